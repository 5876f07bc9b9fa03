pub mod consent;
pub mod owner;
pub mod passcode;
pub mod slot;
pub mod transcript;

pub use consent::{ConsentPurpose, ConsentRecord, ConsentStatus, CURRENT_CONSENT_VERSION};
pub use owner::{DocumentKind, PhoneOwner};
pub use passcode::PasscodeRecord;
pub use slot::{Admission, Slot};
pub use transcript::{ConversationEntry, Role, Transcript};
