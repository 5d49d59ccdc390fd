use webrtc::ice::mdns::MulticastDnsMode;

/// Environment override for the mDNS candidate mode
const MDNS_MODE_ENV: &str = "AVATAR_SESSION_MDNS_MODE";

fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

/// Resolve the mDNS mode: environment first, then the config flag.
///
/// The avatar service is never on the local link, so gathering `.local`
/// candidates is off unless asked for.
pub fn mdns_mode(enabled: bool) -> MulticastDnsMode {
    if let Some(mode) = std::env::var(MDNS_MODE_ENV)
        .ok()
        .and_then(|raw| parse_mdns_mode(&raw))
    {
        return mode;
    }
    if enabled {
        MulticastDnsMode::QueryAndGather
    } else {
        MulticastDnsMode::Disabled
    }
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn mdns_host_name(session_id: &str) -> String {
    format!("{session_id}.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mdns_mode() {
        assert_eq!(parse_mdns_mode(" OFF "), Some(MulticastDnsMode::Disabled));
        assert_eq!(parse_mdns_mode("query-only"), Some(MulticastDnsMode::QueryOnly));
        assert_eq!(parse_mdns_mode("1"), Some(MulticastDnsMode::QueryAndGather));
        assert_eq!(parse_mdns_mode("sometimes"), None);
        assert_eq!(parse_mdns_mode(""), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(mdns_mode_label(MulticastDnsMode::Disabled), "disabled");
        assert_eq!(mdns_host_name("abc"), "abc.local");
    }
}
