/// Read-idle watchdog wrapping the socket read half.
pub mod timeout;
