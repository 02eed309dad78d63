pub mod batch_service;
pub mod cdk_service;
pub mod code_generator;
pub mod redeem_service;
pub mod verify_service;

pub use batch_service::BatchService;
pub use cdk_service::{CdkService, RequestContext};
pub use redeem_service::RedeemService;
pub use verify_service::VerifyService;
