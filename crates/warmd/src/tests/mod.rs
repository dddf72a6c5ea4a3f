//! Behavioural suites for the warm daemon.

mod socket_behaviour;
mod support;
