//! Typed attribute sets and the native query dictionary.
//!
//! A vault speaks in flat dictionaries keyed by short attribute names
//! (`acct`, `svce`, `pdmn`, ...). [`Attribute`] is the typed form of one such
//! entry and [`AttributeSet`] an ordered list of them, built per operation and
//! never persisted.
//!
//! - [`AttributeSet::compose`] turns the list into a [`NativeQuery`]. It is
//!   deterministic; when the same native name appears twice the later entry
//!   wins.
//! - [`AttributeSet::parse`] is the inverse for dictionaries the vault hands
//!   back. Names this crate does not model, and values of the wrong shape,
//!   are dropped.
//!
//! Native names and enumerated values are the platform vault's own constants,
//! so a composed query can be handed to the system keychain unchanged.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Native dictionary
// ---------------------------------------------------------------------------

/// A value inside a native query dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum NativeValue {
    String(String),
    Data(Vec<u8>),
    Number(i64),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl NativeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Booleans come back from some vaults as `0`/`1` numbers.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(0) => Some(false),
            Self::Number(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// The dictionary form of an [`AttributeSet`], keyed by native name.
pub type NativeQuery = BTreeMap<String, NativeValue>;

/// Native attribute names.
pub mod names {
    pub const CLASS: &str = "class";
    pub const ACCOUNT: &str = "acct";
    pub const SERVICE: &str = "svce";
    pub const SERVER: &str = "srvr";
    pub const PROTOCOL: &str = "ptcl";
    pub const PORT: &str = "port";
    pub const PATH: &str = "path";
    pub const AUTHENTICATION_TYPE: &str = "atyp";
    pub const SECURITY_DOMAIN: &str = "sdmn";
    pub const ACCESSIBLE: &str = "pdmn";
    pub const SYNCHRONIZABLE: &str = "sync";
    pub const ACCESS_GROUP: &str = "agrp";
    pub const LABEL: &str = "labl";
    pub const COMMENT: &str = "icmt";
    pub const DESCRIPTION: &str = "desc";
    pub const GENERIC: &str = "gena";
    pub const CREATOR: &str = "crtr";
    pub const TYPE: &str = "type";
    pub const IS_INVISIBLE: &str = "invi";
    pub const IS_NEGATIVE: &str = "nega";
    pub const CREATION_DATE: &str = "cdat";
    pub const MODIFICATION_DATE: &str = "mdat";
    pub const VALUE_DATA: &str = "v_Data";
    pub const RETURN_DATA: &str = "r_Data";
    pub const RETURN_ATTRIBUTES: &str = "r_Attributes";
    pub const MATCH_LIMIT: &str = "m_Limit";
}

/// Whether `name` is a request flag (`r_*` return flags, `m_*` match options)
/// rather than an attribute of the stored item.
pub fn is_control_name(name: &str) -> bool {
    name.starts_with("r_") || name.starts_with("m_")
}

// ---------------------------------------------------------------------------
// Enumerated attribute values
// ---------------------------------------------------------------------------

macro_rules! native_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $native:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )* ];

            /// The vault's constant for this value.
            pub fn as_native(&self) -> &'static str {
                match self {
                    $( $name::$variant => $native, )*
                }
            }

            /// Parse the vault's constant.
            pub fn from_native(s: &str) -> Option<Self> {
                match s {
                    $( $native => Some($name::$variant), )*
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_native())
            }
        }
    };
}

native_enum! {
    /// Storage shape of an item.
    ItemClass {
        /// Generic secret addressed by service name.
        GenericSecret => "genp",
        /// Network credential addressed by server, protocol, port and path.
        NetworkSecret => "inet",
    }
}

native_enum! {
    /// When an item's data may be read.
    Accessibility {
        /// Only while the device is unlocked, and only if a passcode is set.
        /// Never migrates to another device.
        WhenPasscodeSetThisDeviceOnly => "akpu",
        /// While the device is unlocked.
        WhenUnlocked => "ak",
        /// While unlocked; never migrates to another device.
        WhenUnlockedThisDeviceOnly => "aku",
        /// After the first unlock following a restart.
        AfterFirstUnlock => "ck",
        /// After the first unlock; never migrates to another device.
        AfterFirstUnlockThisDeviceOnly => "cku",
        /// Always, regardless of lock state.
        Always => "dk",
    }
}

impl Default for Accessibility {
    fn default() -> Self {
        Self::AfterFirstUnlock
    }
}

native_enum! {
    /// Protocol of a network credential.
    ProtocolScheme {
        Ftp => "ftp ",
        FtpAccount => "ftpa",
        Http => "http",
        Irc => "irc ",
        Nntp => "nntp",
        Pop3 => "pop3",
        Smtp => "smtp",
        Socks => "sox ",
        Imap => "imap",
        Ldap => "ldap",
        AppleTalk => "atlk",
        Afp => "afp ",
        Telnet => "teln",
        Ssh => "ssh ",
        Ftps => "ftps",
        Https => "htps",
        HttpProxy => "htpx",
        HttpsProxy => "htsx",
        FtpProxy => "ftpx",
        Smb => "smb ",
        Rtsp => "rtsp",
        RtspProxy => "rtsx",
        Daap => "daap",
        Eppc => "eppc",
        Ipp => "ipp ",
        Nntps => "ntps",
        Ldaps => "ldps",
        Telnets => "tels",
        Imaps => "imps",
        Ircs => "ircs",
        Pop3s => "pops",
    }
}

native_enum! {
    /// Authentication scheme of a network credential.
    AuthScheme {
        Ntlm => "ntlm",
        Msn => "msna",
        Dpa => "dpaa",
        Rpa => "rpaa",
        HttpBasic => "http",
        HttpDigest => "httd",
        HtmlForm => "form",
        Default => "dflt",
    }
}

impl Default for AuthScheme {
    fn default() -> Self {
        Self::Default
    }
}

native_enum! {
    /// How many items a fetch may return.
    MatchLimit {
        One => "m_LimitOne",
        All => "m_LimitAll",
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// One typed entry of an attribute set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Class(ItemClass),
    Account(String),
    Service(String),
    Server(String),
    Protocol(ProtocolScheme),
    Port(u16),
    Path(String),
    AuthenticationType(AuthScheme),
    SecurityDomain(String),
    Accessible(Accessibility),
    Synchronizable(bool),
    AccessGroup(String),
    Label(String),
    Comment(String),
    Description(String),
    Generic(Vec<u8>),
    Creator(u32),
    ItemType(u32),
    IsInvisible(bool),
    IsNegative(bool),
    CreationDate(DateTime<Utc>),
    ModificationDate(DateTime<Utc>),
    ValueData(Vec<u8>),
    ReturnData(bool),
    ReturnAttributes(bool),
    MatchLimit(MatchLimit),
}

impl Attribute {
    /// The native dictionary key for this entry.
    pub fn native_name(&self) -> &'static str {
        match self {
            Self::Class(_) => names::CLASS,
            Self::Account(_) => names::ACCOUNT,
            Self::Service(_) => names::SERVICE,
            Self::Server(_) => names::SERVER,
            Self::Protocol(_) => names::PROTOCOL,
            Self::Port(_) => names::PORT,
            Self::Path(_) => names::PATH,
            Self::AuthenticationType(_) => names::AUTHENTICATION_TYPE,
            Self::SecurityDomain(_) => names::SECURITY_DOMAIN,
            Self::Accessible(_) => names::ACCESSIBLE,
            Self::Synchronizable(_) => names::SYNCHRONIZABLE,
            Self::AccessGroup(_) => names::ACCESS_GROUP,
            Self::Label(_) => names::LABEL,
            Self::Comment(_) => names::COMMENT,
            Self::Description(_) => names::DESCRIPTION,
            Self::Generic(_) => names::GENERIC,
            Self::Creator(_) => names::CREATOR,
            Self::ItemType(_) => names::TYPE,
            Self::IsInvisible(_) => names::IS_INVISIBLE,
            Self::IsNegative(_) => names::IS_NEGATIVE,
            Self::CreationDate(_) => names::CREATION_DATE,
            Self::ModificationDate(_) => names::MODIFICATION_DATE,
            Self::ValueData(_) => names::VALUE_DATA,
            Self::ReturnData(_) => names::RETURN_DATA,
            Self::ReturnAttributes(_) => names::RETURN_ATTRIBUTES,
            Self::MatchLimit(_) => names::MATCH_LIMIT,
        }
    }

    /// The native dictionary value for this entry.
    pub fn native_value(&self) -> NativeValue {
        match self {
            Self::Class(c) => NativeValue::String(c.as_native().to_string()),
            Self::Protocol(p) => NativeValue::String(p.as_native().to_string()),
            Self::AuthenticationType(a) => NativeValue::String(a.as_native().to_string()),
            Self::Accessible(a) => NativeValue::String(a.as_native().to_string()),
            Self::MatchLimit(m) => NativeValue::String(m.as_native().to_string()),
            Self::Account(s)
            | Self::Service(s)
            | Self::Server(s)
            | Self::Path(s)
            | Self::SecurityDomain(s)
            | Self::AccessGroup(s)
            | Self::Label(s)
            | Self::Comment(s)
            | Self::Description(s) => NativeValue::String(s.clone()),
            Self::Port(p) => NativeValue::Number(i64::from(*p)),
            Self::Creator(n) | Self::ItemType(n) => NativeValue::Number(i64::from(*n)),
            Self::Synchronizable(b)
            | Self::IsInvisible(b)
            | Self::IsNegative(b)
            | Self::ReturnData(b)
            | Self::ReturnAttributes(b) => NativeValue::Bool(*b),
            Self::Generic(d) | Self::ValueData(d) => NativeValue::Data(d.clone()),
            Self::CreationDate(d) | Self::ModificationDate(d) => NativeValue::Date(*d),
        }
    }

    /// Rebuild a typed entry from a native pair.
    ///
    /// Returns `None` for names this crate does not model and for values
    /// whose shape does not fit the name.
    pub fn from_native(name: &str, value: &NativeValue) -> Option<Self> {
        let text = || value.as_str().map(str::to_string);
        let attr = match name {
            names::CLASS => Self::Class(ItemClass::from_native(value.as_str()?)?),
            names::ACCOUNT => Self::Account(text()?),
            names::SERVICE => Self::Service(text()?),
            names::SERVER => Self::Server(text()?),
            names::PROTOCOL => Self::Protocol(ProtocolScheme::from_native(value.as_str()?)?),
            names::PORT => Self::Port(u16::try_from(value.as_number()?).ok()?),
            names::PATH => Self::Path(text()?),
            names::AUTHENTICATION_TYPE => {
                Self::AuthenticationType(AuthScheme::from_native(value.as_str()?)?)
            }
            names::SECURITY_DOMAIN => Self::SecurityDomain(text()?),
            names::ACCESSIBLE => Self::Accessible(Accessibility::from_native(value.as_str()?)?),
            names::SYNCHRONIZABLE => Self::Synchronizable(value.as_bool()?),
            names::ACCESS_GROUP => Self::AccessGroup(text()?),
            names::LABEL => Self::Label(text()?),
            names::COMMENT => Self::Comment(text()?),
            names::DESCRIPTION => Self::Description(text()?),
            names::GENERIC => Self::Generic(value.as_data()?.to_vec()),
            names::CREATOR => Self::Creator(u32::try_from(value.as_number()?).ok()?),
            names::TYPE => Self::ItemType(u32::try_from(value.as_number()?).ok()?),
            names::IS_INVISIBLE => Self::IsInvisible(value.as_bool()?),
            names::IS_NEGATIVE => Self::IsNegative(value.as_bool()?),
            names::CREATION_DATE => Self::CreationDate(value.as_date()?),
            names::MODIFICATION_DATE => Self::ModificationDate(value.as_date()?),
            names::VALUE_DATA => Self::ValueData(value.as_data()?.to_vec()),
            names::RETURN_DATA => Self::ReturnData(value.as_bool()?),
            names::RETURN_ATTRIBUTES => Self::ReturnAttributes(value.as_bool()?),
            names::MATCH_LIMIT => Self::MatchLimit(MatchLimit::from_native(value.as_str()?)?),
            _ => return None,
        };
        Some(attr)
    }
}

// ---------------------------------------------------------------------------
// AttributeSet
// ---------------------------------------------------------------------------

/// Ordered collection of typed attribute entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    entries: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, attr: Attribute) {
        self.entries.push(attr);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, attr: Attribute) -> Self {
        self.push(attr);
        self
    }

    /// Append an entry only when `attr` is `Some`.
    pub fn push_opt(&mut self, attr: Option<Attribute>) {
        if let Some(attr) = attr {
            self.push(attr);
        }
    }

    pub fn entries(&self) -> &[Attribute] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compose into a native dictionary. Later duplicates overwrite earlier
    /// ones.
    pub fn compose(&self) -> NativeQuery {
        let mut query = NativeQuery::new();
        for attr in &self.entries {
            let name = attr.native_name();
            if query.insert(name.to_string(), attr.native_value()).is_some() {
                tracing::trace!(attribute = name, "attribute composed twice; last write wins");
            }
        }
        query
    }

    /// Parse a native dictionary, dropping entries this crate cannot type.
    pub fn parse(query: &NativeQuery) -> Self {
        let entries = query
            .iter()
            .filter_map(|(name, value)| {
                let attr = Attribute::from_native(name, value);
                if attr.is_none() {
                    tracing::trace!(attribute = %name, "dropping unmodelled native attribute");
                }
                attr
            })
            .collect();
        Self { entries }
    }

    // -- Typed accessors ----------------------------------------------------
    //
    // Each returns the last matching entry, mirroring compose's last-write
    // rule.

    fn last<'a, T>(&'a self, f: impl Fn(&'a Attribute) -> Option<T>) -> Option<T> {
        self.entries.iter().rev().find_map(f)
    }

    pub fn class(&self) -> Option<ItemClass> {
        self.last(|a| match a {
            Attribute::Class(c) => Some(*c),
            _ => None,
        })
    }

    pub fn account(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Account(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn service(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Service(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn server(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Server(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn protocol(&self) -> Option<ProtocolScheme> {
        self.last(|a| match a {
            Attribute::Protocol(p) => Some(*p),
            _ => None,
        })
    }

    pub fn port(&self) -> Option<u16> {
        self.last(|a| match a {
            Attribute::Port(p) => Some(*p),
            _ => None,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Path(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn authentication_type(&self) -> Option<AuthScheme> {
        self.last(|a| match a {
            Attribute::AuthenticationType(t) => Some(*t),
            _ => None,
        })
    }

    pub fn accessibility(&self) -> Option<Accessibility> {
        self.last(|a| match a {
            Attribute::Accessible(x) => Some(*x),
            _ => None,
        })
    }

    pub fn synchronizable(&self) -> Option<bool> {
        self.last(|a| match a {
            Attribute::Synchronizable(b) => Some(*b),
            _ => None,
        })
    }

    pub fn access_group(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::AccessGroup(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Label(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn comment(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Comment(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn description(&self) -> Option<&str> {
        self.last(|a| match a {
            Attribute::Description(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn generic(&self) -> Option<&[u8]> {
        self.last(|a| match a {
            Attribute::Generic(d) => Some(d.as_slice()),
            _ => None,
        })
    }

    pub fn creator(&self) -> Option<u32> {
        self.last(|a| match a {
            Attribute::Creator(n) => Some(*n),
            _ => None,
        })
    }

    pub fn item_type(&self) -> Option<u32> {
        self.last(|a| match a {
            Attribute::ItemType(n) => Some(*n),
            _ => None,
        })
    }

    pub fn is_invisible(&self) -> Option<bool> {
        self.last(|a| match a {
            Attribute::IsInvisible(b) => Some(*b),
            _ => None,
        })
    }

    pub fn is_negative(&self) -> Option<bool> {
        self.last(|a| match a {
            Attribute::IsNegative(b) => Some(*b),
            _ => None,
        })
    }

    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.last(|a| match a {
            Attribute::CreationDate(d) => Some(*d),
            _ => None,
        })
    }

    pub fn modification_date(&self) -> Option<DateTime<Utc>> {
        self.last(|a| match a {
            Attribute::ModificationDate(d) => Some(*d),
            _ => None,
        })
    }

    pub fn value_data(&self) -> Option<&[u8]> {
        self.last(|a| match a {
            Attribute::ValueData(d) => Some(d.as_slice()),
            _ => None,
        })
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<Attribute> for AttributeSet {
    fn extend<I: IntoIterator<Item = Attribute>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl IntoIterator for AttributeSet {
    type Item = Attribute;
    type IntoIter = std::vec::IntoIter<Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
