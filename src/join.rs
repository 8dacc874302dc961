//! Join delegation boundary.
//!
//! The adapter does not join; it hands the join criteria plus two
//! capabilities — a single-collection find and a primary-key lookup — to
//! an external stitching algorithm and returns whatever it produces.

use async_trait::async_trait;

use crate::criteria::Criteria;
use crate::error::AdapterError;
use crate::types::Record;

/// The join request as the stitcher receives it.
pub struct JoinPlan<'a> {
    /// The full criteria, `joins` included.
    pub instructions: &'a Criteria,
    /// Collection the stitched result is rooted at.
    pub parent_collection: &'a str,
}

/// Capabilities the adapter exposes to the stitching algorithm.
#[async_trait]
pub trait JoinSource: Send + Sync {
    /// Run a find against one collection of the datastore being joined.
    async fn find(
        &self,
        collection: &str,
        criteria: Criteria,
    ) -> Result<Vec<Record>, AdapterError>;

    /// Primary-key attribute of a collection; `None` for an empty name or
    /// an unknown collection.
    fn primary_key(&self, collection: &str) -> Option<String>;
}

/// The external cursor-join algorithm that emulates cross-collection joins
/// by stitching single-collection result sets into nested records.
#[async_trait]
pub trait JoinStitcher: Send + Sync {
    async fn stitch(
        &self,
        plan: JoinPlan<'_>,
        source: &dyn JoinSource,
    ) -> Result<Vec<Record>, AdapterError>;
}
