//! Typed records for `ip route show` and `ip rule show` output.
//!
//! The reconciler never compares raw text: each observed line is parsed into
//! a [`RouteRecord`] or [`RuleRecord`] and compared field by field. The same
//! parser reads the reconciler's own route clauses, so a clause and the line
//! the kernel prints for it compare equal.
//!
//! `ip` omits attributes that were part of the lookup filter (for example
//! `table` or `dev`), so comparisons only consider a field when both sides
//! carry it.

use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a route or rule line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    #[error("invalid gateway '{0}'")]
    InvalidGateway(String),

    #[error("missing value after '{0}'")]
    MissingValue(String),

    #[error("invalid rule priority '{0}'")]
    InvalidPriority(String),

    #[error("rule has no 'from' selector")]
    MissingFrom,
}

/// Route type keyword that may lead a route line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    Unicast,
    Throw,
    Unreachable,
    Prohibit,
    Blackhole,
    Local,
    Broadcast,
    Multicast,
    Anycast,
}

impl RouteType {
    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "unicast" => Some(RouteType::Unicast),
            "throw" => Some(RouteType::Throw),
            "unreachable" => Some(RouteType::Unreachable),
            "prohibit" => Some(RouteType::Prohibit),
            "blackhole" => Some(RouteType::Blackhole),
            "local" => Some(RouteType::Local),
            "broadcast" => Some(RouteType::Broadcast),
            "multicast" => Some(RouteType::Multicast),
            "anycast" => Some(RouteType::Anycast),
            _ => None,
        }
    }
}

/// Destination of a route, normalised to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDestination {
    Default,
    Prefix(IpNetwork),
}

impl FromStr for RouteDestination {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "0/0" | "0.0.0.0/0" | "::/0" => return Ok(RouteDestination::Default),
            _ => {}
        }
        let net = IpNetwork::from_str(s).map_err(|_| ParseError::InvalidDestination(s.to_string()))?;
        // `ip` prints host bits cleared: 2021:10:10:10::1/64 shows as 2021:10:10:10::/64
        let normalized = IpNetwork::new(net.network(), net.prefix())
            .map_err(|_| ParseError::InvalidDestination(s.to_string()))?;
        Ok(RouteDestination::Prefix(normalized))
    }
}

impl fmt::Display for RouteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDestination::Default => f.write_str("default"),
            RouteDestination::Prefix(net) => write!(f, "{}", net),
        }
    }
}

/// Route attributes that take a value.
const ROUTE_VALUE_KEYS: &[&str] = &[
    "via", "dev", "table", "proto", "metric", "scope", "src", "pref", "expires", "mtu", "advmss",
    "realm", "realms", "weight", "tos", "hoplimit", "initcwnd", "initrwnd", "from",
];

/// One parsed `ip route` line or route clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub route_type: RouteType,
    pub destination: RouteDestination,
    pub via: Option<IpAddr>,
    pub dev: Option<String>,
    pub table: Option<String>,
    pub proto: Option<String>,
    pub metric: Option<u32>,
}

impl RouteRecord {
    /// Parses a single line of `ip route show` output.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        Self::from_tokens(&tokens)
    }

    /// Parses an already tokenised route clause.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, ParseError> {
        let mut iter = tokens.iter().map(AsRef::as_ref).peekable();

        let mut route_type = RouteType::Unicast;
        if let Some(kind) = iter.peek().and_then(|t| RouteType::from_keyword(t)) {
            route_type = kind;
            iter.next();
        }

        let destination: RouteDestination = iter.next().ok_or(ParseError::Empty)?.parse()?;

        let mut record = RouteRecord {
            route_type,
            destination,
            via: None,
            dev: None,
            table: None,
            proto: None,
            metric: None,
        };

        while let Some(key) = iter.next() {
            if !ROUTE_VALUE_KEYS.contains(&key) {
                // flags such as onlink, linkdown, dead
                continue;
            }
            let mut value = iter
                .next()
                .ok_or_else(|| ParseError::MissingValue(key.to_string()))?;
            match key {
                "via" => {
                    if value == "inet" || value == "inet6" {
                        value = iter
                            .next()
                            .ok_or_else(|| ParseError::MissingValue(key.to_string()))?;
                    }
                    let gw = value
                        .parse::<IpAddr>()
                        .map_err(|_| ParseError::InvalidGateway(value.to_string()))?;
                    record.via = Some(gw);
                }
                "dev" => record.dev = Some(value.to_string()),
                "table" => record.table = Some(value.to_string()),
                "proto" => record.proto = Some(value.to_string()),
                "metric" => record.metric = value.parse().ok(),
                _ => {}
            }
        }

        Ok(record)
    }

    /// Returns true if this observed route satisfies `wanted`.
    ///
    /// Destinations must be equal. Every other attribute is compared only
    /// when both records carry it; a unicast type on `wanted` matches any
    /// observed type.
    pub fn satisfies(&self, wanted: &RouteRecord) -> bool {
        fn agree<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }

        self.destination == wanted.destination
            && (wanted.route_type == RouteType::Unicast || self.route_type == wanted.route_type)
            && agree(&self.via, &wanted.via)
            && agree(&self.dev, &wanted.dev)
            && agree(&self.table, &wanted.table)
            && agree(&self.proto, &wanted.proto)
            && agree(&self.metric, &wanted.metric)
    }
}

/// Action taken by a policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// `lookup <table>` (printed as `table <table>` by older iproute2).
    Lookup(String),
    /// Any other action, kept verbatim (`blackhole`, `goto 100`, ...).
    Other(String),
}

/// One parsed `ip rule show` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    pub priority: Option<u32>,
    pub not: bool,
    pub from: String,
    /// Selectors between `from` and the action, e.g. `["iif", "eth1"]`.
    pub selectors: Vec<String>,
    pub action: Option<RuleAction>,
}

impl RuleRecord {
    /// Parses a line such as `32765:\tfrom all lookup Table_eth1`, or a bare
    /// selector such as `from all lookup Table_eth1`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split_whitespace().peekable();
        tokens.peek().ok_or(ParseError::Empty)?;

        let mut priority = None;
        if let Some(first) = tokens.peek().copied() {
            if let Some(prio) = first.strip_suffix(':') {
                priority = Some(
                    prio.parse::<u32>()
                        .map_err(|_| ParseError::InvalidPriority(prio.to_string()))?,
                );
                tokens.next();
            }
        }

        let not = tokens.peek() == Some(&"not");
        if not {
            tokens.next();
        }

        if tokens.next() != Some("from") {
            return Err(ParseError::MissingFrom);
        }
        let from = tokens
            .next()
            .ok_or_else(|| ParseError::MissingValue("from".to_string()))?
            .to_string();

        let mut selectors = Vec::new();
        let mut action = None;
        while let Some(token) = tokens.next() {
            match token {
                "lookup" | "table" => {
                    let table = tokens
                        .next()
                        .ok_or_else(|| ParseError::MissingValue(token.to_string()))?;
                    action = Some(RuleAction::Lookup(table.to_string()));
                    // trailing attributes (proto, ...) are not part of the match
                    break;
                }
                "blackhole" | "unreachable" | "prohibit" | "nop" => {
                    action = Some(RuleAction::Other(token.to_string()));
                    break;
                }
                "goto" => {
                    let target = tokens
                        .next()
                        .ok_or_else(|| ParseError::MissingValue("goto".to_string()))?;
                    action = Some(RuleAction::Other(format!("goto {}", target)));
                    break;
                }
                other => selectors.push(other.to_string()),
            }
        }

        Ok(RuleRecord {
            priority,
            not,
            from,
            selectors,
            action,
        })
    }

    /// Returns the table this rule looks up, if any.
    pub fn lookup_table(&self) -> Option<&str> {
        match &self.action {
            Some(RuleAction::Lookup(table)) => Some(table),
            _ => None,
        }
    }

    /// Returns true if this observed rule matches `wanted`, ignoring priority.
    pub fn matches(&self, wanted: &RuleRecord) -> bool {
        self.not == wanted.not
            && self.from == wanted.from
            && self.selectors == wanted.selectors
            && self.action == wanted.action
    }

    /// Returns true for an unconditional `from all lookup <table>` rule,
    /// where the table may be printed by name or number.
    pub fn sends_all_to(&self, table_name: &str, table_number: u32) -> bool {
        !self.not
            && self.from == "all"
            && self.selectors.is_empty()
            && self
                .lookup_table()
                .map(|t| t == table_name || t.parse::<u32>().ok() == Some(table_number))
                .unwrap_or(false)
    }
}
