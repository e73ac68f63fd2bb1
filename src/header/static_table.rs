//! The fixed static header table (spec §3: "index 0 reserved; indices 1-61
//! mirror HTTP/2's static table; 62-79 reserved; 80-82 are the tracing
//! headers"). 83 entries total, 1-based.

use crate::frame::Header;

/// Entries 1-61, verbatim from RFC 7541 Appendix A (HTTP/2's static table),
/// reused here purely as a familiar, already-size-accounted dictionary —
/// this protocol has no notion of HTTP pseudo-headers, the names are just
/// common enough strings to make good static entries.
const HTTP2_STATIC: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Number of entries in the combined static range (indices 1..=83).
pub const STATIC_LEN: usize = 82;

/// Builds the full 82-entry static table (indices 1-82; index 0 is handled
/// separately by the caller as "never valid"). Entries 62-79 are reserved
/// placeholders for future protocol extensions; entries 80-82 are the
/// tracing headers.
pub fn build() -> Vec<Header> {
    let mut table = Vec::with_capacity(STATIC_LEN);
    for (name, value) in HTTP2_STATIC {
        table.push(Header::new(name.as_bytes(), value.as_bytes()));
    }
    debug_assert_eq!(table.len(), 61);
    while table.len() < 79 {
        let reserved_index = table.len() + 1;
        table.push(Header::new(
            format!("x-reserved-{}", reserved_index).into_bytes(),
            &b""[..],
        ));
    }
    table.push(Header::new(&b"trace_id"[..], &b""[..]));
    table.push(Header::new(&b"span_id"[..], &b""[..]));
    table.push(Header::new(&b"parent_id"[..], &b""[..]));
    debug_assert_eq!(table.len(), STATIC_LEN);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_exactly_82_entries() {
        assert_eq!(build().len(), STATIC_LEN);
    }

    #[test]
    fn tracing_headers_occupy_80_82() {
        let table = build();
        assert_eq!(&table[79].name[..], b"trace_id");
        assert_eq!(&table[80].name[..], b"span_id");
        assert_eq!(&table[81].name[..], b"parent_id");
    }
}
