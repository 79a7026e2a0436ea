//! Nginx front-end config rendering

use handlebars::Handlebars;
use serde_json::json;

use mediagate_core::Config;

const TEMPLATE: &str = include_str!("../templates/nginx.conf.hbs");

/// Render the nginx config from live configuration values.
pub fn render(config: &Config) -> anyhow::Result<String> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_template_string("nginx", TEMPLATE)?;

    let rendered = registry.render(
        "nginx",
        &json!({
            "external_port": config.server.external_port,
            "internal_port": config.server.http_port,
            "emby_upstream": config.library.url,
        }),
    )?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_carries_ports_and_upstream() {
        let mut config = Config::default();
        config.library.url = "http://emby:8096".to_string();
        let output = render(&config).expect("template renders");
        assert!(output.contains("listen 8097;"));
        assert!(output.contains("proxy_pass http://127.0.0.1:7758;"));
        assert!(output.contains("http://emby:8096"));
        assert!(output.contains("Upgrade $http_upgrade"));
    }
}
