//! Template search on screen.
//!
//! - `matcher`: grayscale normalized cross-correlation, coarse-to-fine on
//!   large searches, abortable between rows.
//! - `search`: the bounded retry loop the engine runs for `Search Pattern` events.

use thiserror::Error;

use crate::events::{Point, Region};
use crate::utils::imaging::ImagingError;

pub mod matcher;
pub mod search;

pub use matcher::{Match, best_match, best_match_until, locate, locate_until};
pub use search::{PatternSearcher, SearchOutcome, SearchRequest, SearchSettings};

/// A search that could not be carried out. "Not found" is not an error; see
/// [`SearchOutcome::NotFound`].
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("malformed template image: {0}")]
    Template(#[from] ImagingError),
    #[error("invalid search area {0}: width and height must be positive")]
    Region(Region),
    #[error("screen capture failed: {0:#}")]
    Capture(anyhow::Error),
    #[error("click at {at} failed: {cause:#}")]
    Click { at: Point, cause: anyhow::Error },
}
