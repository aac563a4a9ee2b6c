//! Sorted token tables mapping protocol strings to small integer codes.
//!
//! Tables are plain slices of [`StrIntEntry`] sorted ascending by name. The
//! forward lookup is a binary search over raw bytes, so callers can pass a
//! slice of a wire buffer without copying or NUL-terminating it. The reverse
//! lookup is a linear scan; the tables are small.

use std::cmp::Ordering;

/// One (token, code) pair in a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrIntEntry {
    pub name: &'static str,
    pub id: i32,
}

impl StrIntEntry {
    pub const fn new(name: &'static str, id: i32) -> Self {
        Self { name, id }
    }
}

/// Comparison mode for [`map_str_to_int`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSensitivity {
    Sensitive,
    Insensitive,
}

fn compare(name: &[u8], entry: &str, case: CaseSensitivity) -> Ordering {
    match case {
        CaseSensitivity::Sensitive => name.cmp(entry.as_bytes()),
        CaseSensitivity::Insensitive => name
            .iter()
            .map(u8::to_ascii_lowercase)
            .cmp(entry.bytes().map(|b| b.to_ascii_lowercase())),
    }
}

/// Binary-search `table` for `name`, returning the index of the matching entry.
///
/// The table must be sorted ascending under the same comparison `case`
/// selects. An empty `name` never matches.
pub fn map_str_to_int(name: &[u8], table: &[StrIntEntry], case: CaseSensitivity) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    table
        .binary_search_by(|entry| compare(name, entry.name, case).reverse())
        .ok()
}

/// Linear scan for the entry carrying `id`.
pub fn map_int_to_str(id: i32, table: &[StrIntEntry]) -> Option<usize> {
    table.iter().position(|entry| entry.id == id)
}

/// Whether `table` is strictly ascending under `case`. Used by tests and debug assertions.
pub fn is_sorted(table: &[StrIntEntry], case: CaseSensitivity) -> bool {
    table
        .windows(2)
        .all(|pair| compare(pair[0].name.as_bytes(), pair[1].name, case) == Ordering::Less)
}

macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $table:ident, $case:expr, {
            $($variant:ident = $id:literal => $token:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $id,)+
        }

        /// Sorted lookup table for the tokens of this enum.
        pub const $table: &[StrIntEntry] = &[
            $(StrIntEntry::new($token, $id),)+
        ];

        impl $name {
            /// Look up a token taken from a wire buffer.
            pub fn parse(token: &[u8]) -> Option<Self> {
                map_str_to_int(token, $table, $case).and_then(|i| Self::from_id($table[i].id))
            }

            pub fn from_id(id: i32) -> Option<Self> {
                match id {
                    $($id => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn id(self) -> i32 {
                self as i32
            }

            /// Canonical wire spelling.
            pub fn as_str(self) -> &'static str {
                map_int_to_str(self as i32, $table).map_or("", |i| $table[i].name)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

token_enum! {
    /// HTTP and HTTPU request methods used by SSDP, GENA and SOAP.
    HttpMethod, HTTP_METHOD_TABLE, CaseSensitivity::Sensitive, {
        Delete = 10 => "DELETE",
        Get = 6 => "GET",
        Head = 7 => "HEAD",
        MPost = 2 => "M-POST",
        MSearch = 8 => "M-SEARCH",
        Notify = 5 => "NOTIFY",
        Post = 1 => "POST",
        Put = 9 => "PUT",
        Subscribe = 3 => "SUBSCRIBE",
        Unsubscribe = 4 => "UNSUBSCRIBE",
    }
}

token_enum! {
    /// Header names the protocol engines care about. Header lookup ignores case.
    HttpHeader, HTTP_HEADER_TABLE, CaseSensitivity::Insensitive, {
        Accept = 1 => "ACCEPT",
        CacheControl = 2 => "CACHE-CONTROL",
        Callback = 3 => "CALLBACK",
        ContentLength = 4 => "CONTENT-LENGTH",
        ContentType = 5 => "CONTENT-TYPE",
        Date = 6 => "DATE",
        Ext = 7 => "EXT",
        Host = 8 => "HOST",
        Location = 9 => "LOCATION",
        Man = 10 => "MAN",
        Mx = 11 => "MX",
        Nt = 12 => "NT",
        Nts = 13 => "NTS",
        Seq = 14 => "SEQ",
        Server = 15 => "SERVER",
        Sid = 16 => "SID",
        SoapAction = 17 => "SOAPACTION",
        St = 18 => "ST",
        Timeout = 19 => "TIMEOUT",
        UserAgent = 20 => "USER-AGENT",
        Usn = 21 => "USN",
    }
}
