use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;

pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Whether the caller's `X-Real-IP` lies inside `subnet`; no subnet trusts nobody
pub fn is_trusted(subnet: Option<&IpNet>, headers: &HeaderMap) -> bool {
    let Some(subnet) = subnet else {
        return false;
    };

    headers
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .is_some_and(|ip| subnet.contains(&ip))
}
