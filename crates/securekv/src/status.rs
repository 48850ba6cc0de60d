//! Vault status codes.
//!
//! Every primitive of the [`Vault`](crate::vault::Vault) protocol answers with
//! a raw [`OsStatus`]. [`Status`] is the closed, typed view of that code
//! space: one case per known code, each with a fixed description, plus
//! [`Status::Unknown`] which carries codes this crate has no name for. No code
//! is ever dropped on the floor.
//!
//! The numeric values are those of the platform credential vault, so the
//! same table serves the native keychain backend and the emulated ones.

use std::fmt;

/// Raw status code returned by a vault primitive.
pub type OsStatus = i32;

macro_rules! vault_statuses {
    ($( $name:ident = $code:literal => $desc:literal, )*) => {
        /// A vault status code, resolved to a named case.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Status {
            $( $name, )*
            /// A code outside the known table. The raw value is preserved.
            Unknown(OsStatus),
        }

        impl Status {
            /// Every named status, in table order. [`Status::Unknown`] is not
            /// included.
            pub const KNOWN: &'static [Status] = &[ $( Status::$name, )* ];

            /// Resolve a raw code.
            pub fn from_code(code: OsStatus) -> Self {
                match code {
                    $( $code => Status::$name, )*
                    other => Status::Unknown(other),
                }
            }

            /// The raw code this status stands for.
            pub fn code(&self) -> OsStatus {
                match self {
                    $( Status::$name => $code, )*
                    Status::Unknown(code) => *code,
                }
            }

            /// Fixed human-readable description.
            pub fn description(&self) -> &'static str {
                match self {
                    $( Status::$name => $desc, )*
                    Status::Unknown(_) => "Unknown status.",
                }
            }
        }
    };
}

vault_statuses! {
    Success = 0 => "No error.",
    Unimplemented = -4 => "Function or operation not implemented.",
    DiskFull = -34 => "The disk is full.",
    Io = -36 => "I/O error.",
    OpenForWrite = -49 => "File already open with write permission.",
    Param = -50 => "One or more parameters passed to a function were not valid.",
    WritePermission = -61 => "Write permissions error.",
    Allocate = -108 => "Failed to allocate memory.",
    UserCanceled = -128 => "User canceled the operation.",
    BadRequest = -909 => "Bad parameter or invalid state for operation.",
    InternalComponent = -2070 => "An internal component failed.",
    CoreFoundationUnknown = -4960 => "An unknown Core Foundation error occurred.",
    AclNotSimple = -25240 => "The specified access control list is not in standard (simple) form.",
    PolicyNotFound = -25241 => "The specified policy cannot be found.",
    InvalidTrustSetting = -25242 => "The specified trust setting is invalid.",
    NoAccessForItem = -25243 => "The specified item has no access control.",
    InvalidOwnerEdit = -25244 => "Invalid attempt to change the owner of this item.",
    TrustNotAvailable = -25245 => "No trust results are available.",
    UnsupportedFormat = -25256 => "Import/Export format unsupported.",
    UnknownFormat = -25257 => "Unknown format in import.",
    KeyIsSensitive = -25258 => "Key material must be wrapped for export.",
    MultiplePrivateKeys = -25259 => "An attempt was made to import multiple private keys.",
    PassphraseRequired = -25260 => "Passphrase is required for import/export.",
    InvalidPasswordRef = -25261 => "The password reference was invalid.",
    InvalidTrustSettings = -25262 => "The Trust Settings Record was corrupted.",
    NoTrustSettings = -25263 => "No Trust Settings were found.",
    Pkcs12VerifyFailure = -25264 => "MAC verification failed during PKCS12 import (wrong password?).",
    NotAvailable = -25291 => "No keychain is available. You may need to restart your computer.",
    ReadOnly = -25292 => "This keychain cannot be modified.",
    AuthFailed = -25293 => "The user name or passphrase you entered is not correct.",
    NoSuchKeychain = -25294 => "The specified keychain could not be found.",
    InvalidKeychain = -25295 => "The specified keychain is not a valid keychain file.",
    DuplicateKeychain = -25296 => "A keychain with the same name already exists.",
    DuplicateCallback = -25297 => "The specified callback function is already installed.",
    InvalidCallback = -25298 => "The specified callback function is not valid.",
    DuplicateItem = -25299 => "The specified item already exists in the keychain.",
    ItemNotFound = -25300 => "The specified item could not be found in the keychain.",
    BufferTooSmall = -25301 => "There is not enough memory available to use the specified item.",
    DataTooLarge = -25302 => "This item contains information which is too large or in a format that cannot be displayed.",
    NoSuchAttribute = -25303 => "The specified attribute does not exist.",
    InvalidItemRef = -25304 => "The specified item is no longer valid. It may have been deleted from the keychain.",
    InvalidSearchRef = -25305 => "Unable to search the current keychain.",
    NoSuchClass = -25306 => "The specified item does not appear to be a valid keychain item.",
    NoDefaultKeychain = -25307 => "A default keychain could not be found.",
    InteractionNotAllowed = -25308 => "User interaction is not allowed.",
    ReadOnlyAttribute = -25309 => "The specified attribute could not be modified.",
    WrongSecVersion = -25310 => "This keychain was created by a different version of the system software and cannot be opened.",
    KeySizeNotAllowed = -25311 => "This item specifies a key size which is too large or too small.",
    NoStorageModule = -25312 => "A required component (data storage module) could not be loaded.",
    NoCertificateModule = -25313 => "A required component (certificate module) could not be loaded.",
    NoPolicyModule = -25314 => "A required component (policy module) could not be loaded.",
    InteractionRequired = -25315 => "User interaction is required, but is currently not allowed.",
    DataNotAvailable = -25316 => "The contents of this item cannot be retrieved.",
    DataNotModifiable = -25317 => "The contents of this item cannot be modified.",
    CreateChainFailed = -25318 => "One or more certificates required to validate this certificate cannot be found.",
    InvalidPreferencesDomain = -25319 => "The specified preferences domain is not valid.",
    InDarkWake = -25320 => "In dark wake, no UI possible.",
    NotSigner = -26267 => "A certificate was not signed by its proposed parent.",
    Decode = -26275 => "Unable to decode the provided data.",
    MissingEntitlement = -34018 => "A required entitlement isn't present.",
    RestrictedApi = -34020 => "Client is restricted and is not permitted to perform this operation.",
    ServiceNotAvailable = -67585 => "The required service is not available.",
    InsufficientClientId = -67586 => "The client ID is not correct.",
    DeviceReset = -67587 => "A device reset has occurred.",
    DeviceFailed = -67588 => "A device failure has occurred.",
    VerifyFailed = -67808 => "A cryptographic verification failure has occurred.",
}

impl Status {
    /// `true` only for [`Status::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl From<OsStatus> for Status {
    fn from(code: OsStatus) -> Self {
        Status::from_code(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unknown(code) => write!(f, "unknown status {code}"),
            other => write!(f, "{} ({})", other.description(), other.code()),
        }
    }
}
