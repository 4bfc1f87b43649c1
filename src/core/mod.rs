//! # Core Protocol Components
//!
//! Low-level field framing and wire opcodes.
//!
//! HostConnect has no outer packet envelope. Every frame is a one-byte
//! [`Command`](command::Command) followed by fields whose sizes are implied by
//! the opcode: single bytes, big-endian u16/u32 lengths, UTF-8 strings and
//! raw byte blocks.
//!
//! ## Components
//! - **Command**: opcode and authentication type enums
//! - **Frame**: timed readers/writers over split async streams, a frame
//!   builder and an in-memory block parser
//!
//! ## Wire Format
//! ```text
//! [Opcode(1)] [Field]...
//! Field := u8 | u16 BE | u32 BE | [Len(1|2)] [UTF-8 or raw bytes]
//! ```

pub mod command;
pub mod frame;
