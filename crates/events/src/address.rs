//! Endpoint addressing.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use jitney_core::ValueObject;

use crate::error::BusError;

const SEPARATOR: char = '@';

/// Logical destination of a bus: a queue on a machine.
///
/// Equality is by value over both parts. The string form is `queue@machine` and
/// round-trips through `FromStr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointAddress {
    queue_name: String,
    machine_name: String,
}

impl ValueObject for EndpointAddress {}

impl EndpointAddress {
    pub fn new(queue_name: impl Into<String>, machine_name: impl Into<String>) -> Result<Self, BusError> {
        let queue_name = queue_name.into();
        let machine_name = machine_name.into();
        validate_part("queue name", &queue_name)?;
        validate_part("machine name", &machine_name)?;
        Ok(Self {
            queue_name,
            machine_name,
        })
    }

    /// Address of `queue_name` on the local host.
    pub fn local(queue_name: impl Into<String>) -> Result<Self, BusError> {
        Self::new(queue_name, local_machine_name())
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Derived address on the same machine, e.g. `orders.retry@host`.
    pub fn sub_scope(&self, scope: &str) -> Result<Self, BusError> {
        if scope.trim().is_empty() {
            return Err(BusError::invalid_argument("sub-scope cannot be empty"));
        }
        Self::new(format!("{}.{scope}", self.queue_name), self.machine_name.clone())
    }

    pub fn retry_address(&self) -> Self {
        self.derived("retry")
    }

    pub fn error_address(&self) -> Self {
        self.derived("error")
    }

    fn derived(&self, scope: &'static str) -> Self {
        Self {
            queue_name: format!("{}.{scope}", self.queue_name),
            machine_name: self.machine_name.clone(),
        }
    }
}

/// Host name used when an address omits its machine part.
pub fn local_machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty() && !name.contains(SEPARATOR))
        .unwrap_or_else(|| "localhost".to_string())
}

fn validate_part(what: &str, value: &str) -> Result<(), BusError> {
    if value.trim().is_empty() {
        return Err(BusError::invalid_argument(format!("{what} cannot be empty")));
    }
    if value.contains(SEPARATOR) {
        return Err(BusError::InvalidAddress(value.to_string()));
    }
    Ok(())
}

impl core::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.queue_name, self.machine_name)
    }
}

impl FromStr for EndpointAddress {
    type Err = BusError;

    /// Parses `queue@machine`; a bare `queue` resolves to the local machine.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(SEPARATOR) {
            Some((queue, machine)) => {
                if queue.is_empty() || machine.is_empty() || machine.contains(SEPARATOR) {
                    return Err(BusError::InvalidAddress(s.to_string()));
                }
                Self::new(queue, machine)
            }
            None => Self::local(s),
        }
    }
}

impl TryFrom<String> for EndpointAddress {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EndpointAddress> for String {
    fn from(value: EndpointAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_is_queue_at_machine() {
        let addr = EndpointAddress::new("orders", "host-a").unwrap();
        assert_eq!(addr.to_string(), "orders@host-a");
    }

    #[test]
    fn bare_queue_resolves_to_local_machine() {
        let addr: EndpointAddress = "orders".parse().unwrap();
        assert_eq!(addr.queue_name(), "orders");
        assert_eq!(addr.machine_name(), local_machine_name());
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(matches!(
            EndpointAddress::new("", "host"),
            Err(BusError::InvalidArgument(_))
        ));
        assert!(matches!(
            EndpointAddress::new("orders", "  "),
            Err(BusError::InvalidArgument(_))
        ));
        assert!("orders@".parse::<EndpointAddress>().is_err());
        assert!("@host".parse::<EndpointAddress>().is_err());
        assert!("a@b@c".parse::<EndpointAddress>().is_err());
    }

    #[test]
    fn derived_addresses_stay_on_the_same_machine() {
        let addr = EndpointAddress::new("orders", "host-a").unwrap();
        assert_eq!(addr.retry_address().to_string(), "orders.retry@host-a");
        assert_eq!(addr.error_address().to_string(), "orders.error@host-a");
        assert_eq!(
            addr.sub_scope("audit").unwrap().to_string(),
            "orders.audit@host-a"
        );
    }

    #[test]
    fn serializes_as_string_form() {
        let addr = EndpointAddress::new("orders", "host-a").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"orders@host-a\"");
        let back: EndpointAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        /// Property: parse(to_string(addr)) == addr for any valid address.
        #[test]
        fn string_form_round_trips(
            queue in "[a-z][a-z0-9._-]{0,30}",
            machine in "[A-Za-z0-9][A-Za-z0-9.-]{0,30}",
        ) {
            let addr = EndpointAddress::new(queue, machine).unwrap();
            let parsed: EndpointAddress = addr.to_string().parse().unwrap();
            prop_assert_eq!(parsed, addr);
        }
    }
}
