use chrono::Utc;

/// Get timestamp in the ISO format the marketplace expects (YYYY-MM-DDTHH:MM:SS.fffZ)
pub fn get_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Get user agent string for marketplace requests
pub fn get_user_agent(agent_name: &str, agent_version: &str) -> String {
    format!("{}/{}", agent_name, agent_version)
}
