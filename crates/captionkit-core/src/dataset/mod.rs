//! Image datasets: a directory of images, each optionally paired with a
//! `.txt` sidecar holding its tags joined by the tag separator.

mod entry;
mod filter;
mod library;

pub use entry::ImageEntry;
pub use filter::{CompareOp, CountField, Filter, Pattern};
pub use library::{ImageLibrary, TransferFailure, TransferReport};
