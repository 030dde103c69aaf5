pub mod contact;
pub mod fingerprint;
pub mod group;
pub mod identity;
pub mod message;

pub use contact::Contact;
pub use fingerprint::{Fingerprint, FingerprintError};
pub use group::{Group, GroupMembership, GroupSymmetricKey, MembershipState};
pub use identity::Identity;
pub use message::{
    Direction, Message, MessageId, MessageKind, MessageStatus, Receipt, ReceiptKind,
    ReceiptReference, Recipient,
};
