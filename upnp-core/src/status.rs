//! HTTP reason phrases indexed by status code.

use std::sync::OnceLock;

const HTTP_1XX: &str = "Continue\0Switching Protocols\0";

const HTTP_2XX: &str = "OK\0\
    Created\0\
    Accepted\0\
    Non-Authoratative Information\0\
    No Content\0\
    Reset Content\0\
    Partial Content\0";

const HTTP_3XX: &str = "Multiple Choices\0\
    Moved Permanently\0\
    Found\0\
    See Other\0\
    Not Modified\0\
    Use Proxy\0\
    \0\
    Temporary Redirect\0";

const HTTP_4XX: &str = "Bad Request\0\
    Unauthorized\0\
    Payment Required\0\
    Forbidden\0\
    Not Found\0\
    Method Not Allowed\0\
    Not Acceptable\0\
    Proxy Authentication Required\0\
    Request Timeout\0\
    Conflict\0\
    Gone\0\
    Length Required\0\
    Precondition Failed\0\
    Request Entity Too Large\0\
    Request-URI Too Long\0\
    Unsupported Media Type\0\
    Requested Range Not Satisfiable\0\
    Expectation Failed\0";

const HTTP_5XX: &str = "Internal Server Error\0\
    Not Implemented\0\
    Bad Gateway\0\
    Service Unavailable\0\
    Gateway Timeout\0\
    HTTP Version Not Supported\0\
    Variant Also Negotiates\0\
    Insufficient Storage\0\
    Loop Detected\0\
    \0\
    Not Extended\0";

/// Block and declared entry count for each hundred.
const BLOCKS: [(&str, usize); 5] = [
    (HTTP_1XX, 2),
    (HTTP_2XX, 7),
    (HTTP_3XX, 8),
    (HTTP_4XX, 18),
    (HTTP_5XX, 11),
];

type StatusTables = [Vec<&'static str>; 5];

static TABLES: OnceLock<StatusTables> = OnceLock::new();

fn split_block(block: &'static str, count: usize) -> Vec<&'static str> {
    block.split('\0').take(count).collect()
}

fn tables() -> &'static StatusTables {
    TABLES.get_or_init(|| BLOCKS.map(|(block, count)| split_block(block, count)))
}

/// Reason phrase for `code`.
///
/// Returns `None` below 100, at or above 600, past the populated entries of
/// a hundred, and for the reserved slots (306, 509) the table leaves blank.
pub fn get_status_text(code: u16) -> Option<&'static str> {
    if !(100..600).contains(&code) {
        return None;
    }
    let table = &tables()[usize::from(code / 100 - 1)];
    table
        .get(usize::from(code % 100))
        .copied()
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(100, "Continue")]
    #[case(200, "OK")]
    #[case(203, "Non-Authoratative Information")]
    #[case(307, "Temporary Redirect")]
    #[case(404, "Not Found")]
    #[case(412, "Precondition Failed")]
    #[case(417, "Expectation Failed")]
    #[case(503, "Service Unavailable")]
    #[case(510, "Not Extended")]
    fn test_known_phrases(#[case] code: u16, #[case] expected: &str) {
        assert_eq!(get_status_text(code), Some(expected));
    }

    #[rstest]
    #[case(0)]
    #[case(99)]
    #[case(102)]
    #[case(207)]
    #[case(306)]
    #[case(308)]
    #[case(418)]
    #[case(509)]
    #[case(511)]
    #[case(600)]
    #[case(999)]
    fn test_missing_phrases(#[case] code: u16) {
        assert_eq!(get_status_text(code), None);
    }

    #[test]
    fn test_block_sizes_match_declared_counts() {
        for (i, (_, count)) in BLOCKS.iter().enumerate() {
            assert_eq!(tables()[i].len(), *count);
        }
    }

    #[test]
    fn test_concurrent_first_use() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| get_status_text(500)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some("Internal Server Error"));
        }
    }
}
