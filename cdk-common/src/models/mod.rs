// File: cdk-common/src/models/mod.rs
pub mod batch;
pub mod caller;
pub mod code;
pub mod redemption;

pub use batch::{Batch, BatchCreated, BatchSummary, CodeCounts, NewBatchRequest};
pub use caller::{Caller, ClientContext, Role};
pub use code::{BenefitMetadata, Code, CodeStatus};
pub use redemption::{InvalidReason, RedeemReceipt, RedemptionEvent, VerifyOutcome};
