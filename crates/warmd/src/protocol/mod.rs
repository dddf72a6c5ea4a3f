//! Wire protocol for a single request per connection.
//!
//! A client writes `<token> <json>` and half-closes its side of the socket:
//!
//! ```text
//! a1b2c3d4e5f6a1b2 {"cwd":"/work","args":["--fix"],"text":"..."}
//! ```
//!
//! The daemon answers with the transformed text and closes. Failures the
//! client should see are written as the error message followed by a final
//! `# exit <status>` line; authentication and framing failures close the
//! connection without writing anything. The body `stop` in place of the JSON
//! object asks the daemon to shut down.

mod assembler;
mod errors;
mod request;
mod response;

pub use self::assembler::{AssemblyState, RequestAssembler};
pub use self::errors::{ConnectionError, ErrorKind};
pub use self::request::{Command, Request, STOP_COMMAND};
pub use self::response::{EXIT_TRAILER, Reply, ResponseStreamer};
