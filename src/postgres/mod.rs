//! [Catalog] and [Dumper] backed by the PostgreSQL client tools.
//!
//! [Catalog]: crate::source::Catalog
//! [Dumper]: crate::source::Dumper

mod catalog;
mod dump;

pub use catalog::Psql;
pub use dump::PgDump;

/// Quotes `value` for use in a libpq connection string.
fn conninfo_quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_conninfo_values() {
        assert_eq!(conninfo_quote("shop"), "'shop'");
        assert_eq!(conninfo_quote("it's"), r"'it\'s'");
        assert_eq!(conninfo_quote(r"a\b"), r"'a\\b'");
        assert_eq!(conninfo_quote("host=evil"), "'host=evil'");
    }
}
