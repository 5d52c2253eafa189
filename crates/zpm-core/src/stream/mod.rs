//! Classification of raw process output into leveled [`Message`](zpm_model::Message)s.
//!
//! Line protocol:
//! - `N::text` → one message at level `N`
//! - `N:::` opens a multi-line block at level `N`, closed by a line `:::`
//! - anything else → the default level of the stream (stdout `1`, stderr `2`)

mod buffer;
pub use buffer::{RingBuffer, join_lines};

mod consumer;
pub use consumer::{Classifier, Interceptor, consume};
