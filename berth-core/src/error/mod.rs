//! Error handling for the Berth placement engine
//!
//! Placement outcomes fall into three groups, and only one of them is an error:
//!
//! - **Hard stops** are returned as `Err`: the target zone is dedicated to a
//!   different tenant or disabled for it, the VM's dedication or affinity
//!   state is malformed, or the VM profile itself is unusable. Callers must not
//!   retry these with a fresh avoid list; [`BerthError::is_hard_stop`] tells
//!   them apart.
//! - **Soft rejections** (inaccessible pool, missing capacity, tag, GPU, UEFI or
//!   encryption mismatch, reservation-mode conflict) never surface as errors.
//!   They only grow the caller's exclude list.
//! - **Exhaustion** is `Ok(None)`: every candidate was explored and none fit.
//!
//! ## Error Categories
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Berth Error Taxonomy                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  Placement (hard stop)  │  Resource      │  System       │
//! │  ┌──────────────────┐   │  ┌──────────┐  │  ┌─────────┐  │
//! │  │ • ZoneUnavailable│   │  │ • NotFound│ │  │ • Storage│ │
//! │  │ • Dedication     │   │  │ • Exists  │ │  │ • Serde  │ │
//! │  │ • Affinity       │   │  └──────────┘  │  │ • IO     │ │
//! │  │ • InvalidProfile │   │  Logic         │  │ • Internal│ │
//! │  └──────────────────┘   │  • Config      │  └─────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod constructors;
pub mod context;
pub mod conversions;
pub mod types;

pub use context::{SerializationContext, StorageContext};
pub use types::{BerthError, BerthResult, Result};
