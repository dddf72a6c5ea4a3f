//! Service backed by an external program.
//!
//! Each invocation spawns the configured program in the request's working
//! directory with the request's arguments, writes the text to its stdin and
//! returns whatever it printed on stdout. The program is killed when the
//! request deadline passes.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Completion, SERVICE_TARGET, ServiceFailure, ServiceRequest, TransformService};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external program for every request.
#[derive(Debug, Clone)]
pub struct CommandService {
    program: PathBuf,
    name: String,
}

impl CommandService {
    /// Uses `program` as the transformation.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program.display().to_string();
        Self { program, name }
    }

    /// Program run for each request.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, request: ServiceRequest) -> Result<String, ServiceFailure> {
        let ServiceRequest {
            cwd,
            args,
            text,
            deadline,
        } = request;

        debug!(
            target: SERVICE_TARGET,
            program = %self.name,
            args = args.len(),
            input_bytes = text.len(),
            "spawning service program"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                ServiceFailure::new(format!("failed to start '{}': {error}", self.name))
            })?;

        let pipes = match Pipes::attach(&mut child, text) {
            Ok(pipes) => pipes,
            Err(error) => {
                drop(child.kill());
                drop(child.wait());
                return Err(ServiceFailure::new(format!("{}: {error}", self.name)));
            }
        };
        let status = wait_until(&mut child, deadline)
            .map_err(|error| ServiceFailure::new(format!("{}: {error}", self.name)))?;
        let output = pipes.collect(&self.name)?;

        let Some(status) = status else {
            warn!(
                target: SERVICE_TARGET,
                program = %self.name,
                "service program missed its deadline and was killed"
            );
            return Err(ServiceFailure::new(format!("'{}' timed out", self.name)));
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let code = status
                .code()
                .map_or_else(|| String::from("a signal"), |code| format!("status {code}"));
            return Err(ServiceFailure::new(if detail.is_empty() {
                format!("'{}' exited with {code}", self.name)
            } else {
                format!("'{}' exited with {code}: {detail}", self.name)
            }));
        }

        String::from_utf8(output.stdout).map_err(|error| {
            ServiceFailure::new(format!(
                "'{}' wrote invalid UTF-8 at byte {}",
                self.name,
                error.utf8_error().valid_up_to()
            ))
        })
    }
}

impl TransformService for CommandService {
    fn invoke(&self, request: ServiceRequest, completion: Completion) {
        completion.complete(self.run(request));
    }

    fn is_reentrant(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct Output {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Threads feeding stdin and draining stdout and stderr so that neither side
/// blocks on a full pipe.
struct Pipes {
    writer: JoinHandle<io::Result<()>>,
    stdout: JoinHandle<io::Result<Vec<u8>>>,
    stderr: JoinHandle<io::Result<Vec<u8>>>,
}

impl Pipes {
    fn attach(child: &mut Child, text: String) -> io::Result<Self> {
        let missing = |what: &str| io::Error::other(format!("failed to capture {what}"));
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let writer = thread::Builder::new()
            .name(String::from("warmd-service-stdin"))
            .spawn(move || match stdin.write_all(text.as_bytes()) {
                Err(error) if error.kind() != io::ErrorKind::BrokenPipe => Err(error),
                _ => Ok(()),
            })?;
        Ok(Self {
            writer,
            stdout: spawn_reader::<ChildStdout>("warmd-service-stdout", stdout)?,
            stderr: spawn_reader::<ChildStderr>("warmd-service-stderr", stderr)?,
        })
    }

    fn collect(self, name: &str) -> Result<Output, ServiceFailure> {
        let joined = |handle: JoinHandle<io::Result<Vec<u8>>>, what: &str| {
            handle
                .join()
                .map_err(|_| ServiceFailure::new(format!("{name}: {what} reader panicked")))?
                .map_err(|error| ServiceFailure::new(format!("{name}: reading {what}: {error}")))
        };
        let stdout = joined(self.stdout, "stdout")?;
        let stderr = joined(self.stderr, "stderr")?;
        match self.writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                return Err(ServiceFailure::new(format!("{name}: writing stdin: {error}")));
            }
            Err(_) => {
                return Err(ServiceFailure::new(format!("{name}: stdin writer panicked")));
            }
        }
        Ok(Output { stdout, stderr })
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    thread_name: &str,
    mut source: R,
) -> io::Result<JoinHandle<io::Result<Vec<u8>>>> {
    thread::Builder::new()
        .name(thread_name.to_owned())
        .spawn(move || {
            let mut buffer = Vec::new();
            source.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
}

/// Polls the child until it exits or `deadline` passes. Returns `None` after
/// killing a child that overran.
fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            drop(child.kill());
            drop(child.wait());
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
