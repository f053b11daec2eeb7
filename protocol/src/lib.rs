pub mod control;
pub mod dto;
pub mod frame;

pub use control::ControlMessage;
pub use frame::{decode_chunk, encode_chunk, FrameError, MAX_FRAME_SIZE};
