//! Table, chain and rule option names used by docknatd.
//!
//! These match the names printed by `iptables -S`.

/// Netfilter table that holds the forwarding rules.
pub const NAT_TABLE_NAME: &str = "nat";

/// Chain the forwarding rules are appended to.
pub const PREROUTING_CHAIN_NAME: &str = "PREROUTING";

/// Docker network whose container addresses become DNAT targets.
pub const DEFAULT_BRIDGE_NETWORK: &str = "bridge";

/// Jump target that marks a rule as a port forward.
pub const DNAT_TARGET: &str = "DNAT";

/// Option flags recognized in a rule listing.
pub mod flags {
    /// Chain append, as printed at the start of every listed rule.
    pub const APPEND: &str = "-A";

    /// Chain append, long form.
    pub const APPEND_LONG: &str = "--append";

    /// Protocol match, short form.
    pub const PROTOCOL: &str = "-p";

    /// Protocol match, long form.
    pub const PROTOCOL_LONG: &str = "--protocol";

    /// Destination port match.
    pub const DPORT: &str = "--dport";

    /// Jump target, short form.
    pub const JUMP: &str = "-j";

    /// Jump target, long form.
    pub const JUMP_LONG: &str = "--jump";

    /// DNAT target address, `ADDRESS:PORT`.
    pub const TO_DESTINATION: &str = "--to-destination";

    /// Negation prefix for the following option.
    pub const NEGATE: &str = "!";
}
