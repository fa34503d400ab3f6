//! SQL dialect descriptor.
//!
//! The provider composes its statements from this descriptor so that a
//! second dialect is a data change, not a new provider. Only the pieces
//! the dynamically built statements actually differ on live here.

/// Descriptor of one SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDialect {
    /// Dialect name, for logging.
    pub name: &'static str,
    /// Whether `INSERT … ON CONFLICT` upserts are available.
    pub supports_on_conflict: bool,
}

impl SqlDialect {
    /// PostgreSQL.
    pub const POSTGRES: SqlDialect = SqlDialect {
        name: "postgres",
        supports_on_conflict: true,
    };

    /// Render the positional placeholder for parameter `n` (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    /// Render a limit/offset clause bound to the given parameters.
    pub fn limit_and_offset(&self, limit_param: usize, offset_param: usize) -> String {
        format!(
            " LIMIT {} OFFSET {}",
            self.placeholder(limit_param),
            self.placeholder(offset_param)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_clauses() {
        let dialect = SqlDialect::POSTGRES;
        assert_eq!(dialect.placeholder(3), "$3");
        assert_eq!(dialect.limit_and_offset(2, 3), " LIMIT $2 OFFSET $3");
    }
}
