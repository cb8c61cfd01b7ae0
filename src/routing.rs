//! Read/write endpoint attribution.

/// Host, database and user of one database endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointIdentity {
    pub host: String,
    pub database: String,
    pub user: String,
}

impl EndpointIdentity {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            user: user.into(),
        }
    }
}

/// The primary (read-write) endpoint and an optional replica (read-only) one.
///
/// # Example
///
/// ```rust
/// use sqlm::{EndpointIdentity, Endpoints};
///
/// let endpoints = Endpoints::new(EndpointIdentity::new("db-1:3306", "shop", "app"))
///     .with_replica(EndpointIdentity::new("", "shop_ro", ""));
///
/// let target = endpoints.resolve(true);
/// assert_eq!(target, EndpointIdentity::new("db-1:3306", "shop_ro", "app"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub primary: EndpointIdentity,
    pub replica: Option<EndpointIdentity>,
}

impl Endpoints {
    pub fn new(primary: EndpointIdentity) -> Self {
        Self {
            primary,
            replica: None,
        }
    }

    pub fn with_replica(mut self, replica: EndpointIdentity) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Resolve which endpoint identity a statement is attributed to.
    ///
    /// Each field is resolved on its own: a read-eligible statement takes the
    /// replica's value when that field is non-empty, otherwise the primary's.
    pub fn resolve(&self, read_eligible: bool) -> EndpointIdentity {
        let replica = self.replica.as_ref().filter(|_| read_eligible);
        let pick = |primary: &String, replica: Option<&String>| -> String {
            match replica {
                Some(value) if !value.is_empty() => value.clone(),
                _ => primary.clone(),
            }
        };

        EndpointIdentity {
            host: pick(&self.primary.host, replica.map(|r| &r.host)),
            database: pick(&self.primary.database, replica.map(|r| &r.database)),
            user: pick(&self.primary.user, replica.map(|r| &r.user)),
        }
    }
}

/// The `type` label of query metrics: which side of the replication pair ran
/// the statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StatementClass {
    #[default]
    Primary,
    Replica,
}

impl StatementClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementClass::Primary => "master",
            StatementClass::Replica => "slave",
        }
    }
}

impl std::fmt::Display for StatementClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new(EndpointIdentity::new("h1", "d1", "u1"))
    }

    #[test]
    fn test_per_field_fallback() {
        let endpoints = endpoints().with_replica(EndpointIdentity::new("", "d2", ""));
        assert_eq!(
            endpoints.resolve(true),
            EndpointIdentity::new("h1", "d2", "u1")
        );
    }

    #[test]
    fn test_full_replica() {
        let endpoints = endpoints().with_replica(EndpointIdentity::new("h2", "d2", "u2"));
        assert_eq!(
            endpoints.resolve(true),
            EndpointIdentity::new("h2", "d2", "u2")
        );
    }

    #[test]
    fn test_writes_stay_on_primary() {
        let endpoints = endpoints().with_replica(EndpointIdentity::new("h2", "d2", "u2"));
        assert_eq!(
            endpoints.resolve(false),
            EndpointIdentity::new("h1", "d1", "u1")
        );
    }

    #[test]
    fn test_no_replica() {
        assert_eq!(
            endpoints().resolve(true),
            EndpointIdentity::new("h1", "d1", "u1")
        );
    }

    #[test]
    fn test_class_labels() {
        assert_eq!(StatementClass::default(), StatementClass::Primary);
        assert_eq!(StatementClass::Primary.as_str(), "master");
        assert_eq!(StatementClass::Replica.to_string(), "slave");
    }
}
