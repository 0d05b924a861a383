//! Simulated wallbox for development and testing.
//!
//! Produces plausible readings for every built-in sensor topic so the bridge
//! can be exercised without real hardware.

mod wallbox;

pub use wallbox::{WallboxSimulator, run_wallbox_simulation};
