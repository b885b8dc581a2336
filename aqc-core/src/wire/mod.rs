//! Types that cross the service boundary.
//!
//! | Type | Used for |
//! |------|----------|
//! | [`ApiResponse`] | every upload response |
//! | [`QcVerdict`] | `data` of a successful response |
//! | [`HealthReport`] | health endpoint |
//! | [`StatusCode`] | stable business codes |

pub mod response;
pub mod status;

pub use response::{ApiResponse, Empty, HealthReport, QcVerdict, ResponseData, VadSummary};
pub use status::StatusCode;
