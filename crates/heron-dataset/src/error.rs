#[derive(derive_more::Display, Debug)]
pub enum Error {
    #[display(fmt = "spawning worker")]
    SpawnWorker,
    #[display(fmt = "worker panicked")]
    WorkerPanicked,
    #[display(fmt = "error executing task {index}")]
    Task { index: usize },
}

impl error_stack::Context for Error {}
