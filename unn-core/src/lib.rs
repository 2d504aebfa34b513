//! Shared protocol types and registries for the Underground Node Network:
//! the wire envelope codec, the identity and room registries, platform
//! verification, and the persistence layer they sit on.

pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod messages;
pub mod persistence;
pub mod room;
pub mod validate;
pub mod verifier;

pub use error::{EnvelopeError, IdentityError, PersistError, RoomError, ValidationError, VerifierError};
pub use fingerprint::{decode_wire_key, encode_wire_key, PublicKeyFingerprint};
pub use identity::{Identity, IdentityRegistry, PlatformInfo, PlatformTag, UserStatus};
pub use room::{LiveRoom, RegisterOutcome, RoomRegistration, RoomRegistry};
