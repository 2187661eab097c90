pub mod buffer;
pub mod extractor;
pub mod presence;

pub use buffer::SignalBuffer;
pub use extractor::SignalExtractor;
pub use presence::{FingerPresenceDetector, PresenceReading};
