pub mod codec;
pub mod remote;
pub mod synthetic;

pub use codec::{FfmpegCodec, GifCodec};
pub use remote::{RemoteProvider, WorkerClient};
pub use synthetic::SyntheticProvider;
