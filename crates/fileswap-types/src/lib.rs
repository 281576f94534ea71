pub mod api;
pub mod clock;
pub mod models;
pub mod row;

pub use api::{ErrorResponse, SwapUploadResponse, SwapView, UploadResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use models::{
    FileDescriptor, MAX_FILE_SIZE, SWAP_LIFETIME_HOURS, Slot, SwapRecord, SwapStatus, SwapUpdate,
    UpdateRejected, swap_lifetime,
};
pub use row::SwapRow;
