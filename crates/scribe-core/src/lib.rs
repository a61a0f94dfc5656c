//! # Scribe Core
//!
//! Building blocks shared by every Scribe replica:
//!
//! - [`Identifier`]: dense, totally ordered positions for characters
//! - [`VersionVector`]: per-site operation counters with gap tracking
//!
//! ```rust
//! use rand::SeedableRng;
//! use scribe_core::{Identifier, SiteId};
//!
//! let site = SiteId::new("a");
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let first = Identifier::between(&Identifier::default(), &Identifier::default(), &site, &mut rng).unwrap();
//! let second = Identifier::between(&first, &Identifier::default(), &site, &mut rng).unwrap();
//! assert!(first < second);
//! ```

pub mod identifier;
pub mod version_vector;

pub use identifier::{Identifier, OrderingError, Position, SiteId, BASE, BOUNDARY};
pub use version_vector::{Version, VersionVector};
