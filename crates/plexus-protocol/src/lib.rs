//! Wire-format types for every dialect plexus speaks.
//!
//! Pure data: serde structs/enums per provider dialect plus the SSE framing
//! codec. No IO and no transformation logic; that lives in `plexus-transform`.
//! Parsing is deliberately tolerant (unknown fields ignored, finish/stop
//! reasons kept as raw strings) because this code sits between third-party
//! implementations that evolve independently.

pub mod claude;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod sse;
