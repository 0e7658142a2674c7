/// Events that drive the daemon loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Time to run a monitoring cycle
    Tick,
    /// Flush pending alerts and exit
    Shutdown,
    /// A background task failed
    Error(String),
}
