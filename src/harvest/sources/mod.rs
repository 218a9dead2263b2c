//! The metadata sources consulted for every harvest.

pub mod fairsharing;
pub mod re3data;
pub mod self_hosted;

pub use fairsharing::{FairSharingCredentials, FairSharingHarvester, DEFAULT_FAIRSHARING_API};
pub use re3data::{Re3DataHarvester, DEFAULT_MAX_CANDIDATES, DEFAULT_RE3DATA_API};
pub use self_hosted::SelfHostedExtractor;
