//! HTML for the setup portal.

use crate::network::ScanEntry;
use std::fmt::Write;
use std::net::Ipv4Addr;

const STYLE: &str = "body{font-family:system-ui,-apple-system,Segoe UI,Roboto,Arial;margin:0;padding:24px;background:#f6f7fb;color:#111}\
.card{max-width:560px;margin:auto;background:#fff;border-radius:16px;box-shadow:0 6px 24px rgba(0,0,0,.08);padding:20px}\
h1{font-size:22px;margin:0 0 12px}\
label{display:block;margin:12px 0 6px;font-weight:600}\
input,select{width:100%;padding:10px;border:1px solid #ddd;border-radius:10px;font-size:14px}\
button{margin-top:16px;padding:12px 16px;border:0;border-radius:12px;font-weight:700;background:#111;color:#fff}\
.muted{color:#666;font-size:12px;margin-top:8px}";

/// Escape text for use in HTML content and double-quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// One entry per SSID, strongest signal first. Hidden networks are dropped.
pub fn dedup_networks(networks: &[ScanEntry]) -> Vec<ScanEntry> {
    let mut unique: Vec<ScanEntry> = Vec::with_capacity(networks.len());
    for entry in networks.iter().filter(|n| !n.ssid.is_empty()) {
        match unique.iter_mut().find(|u| u.ssid == entry.ssid) {
            Some(existing) if existing.rssi < entry.rssi => existing.rssi = entry.rssi,
            Some(_) => {}
            None => unique.push(entry.clone()),
        }
    }
    unique.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    unique
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{}</title><style>{}</style></head><body><div class=\"card\">{}</div></body></html>",
        title, STYLE, body
    )
}

/// The setup form with the scan results.
pub fn config_page(networks: &[ScanEntry]) -> String {
    let mut options = String::new();
    for network in dedup_networks(networks) {
        let ssid = escape_html(&network.ssid);
        // Writing to a String cannot fail
        let _ = write!(
            options,
            "<option value=\"{}\">{} ({} dBm)</option>",
            ssid, ssid, network.rssi
        );
    }

    let body = format!(
        "<h1>ESP32 Wi-Fi Setup</h1>\
<form method=\"POST\" action=\"/save\">\
<label>Wi-Fi SSID</label>\
<select name=\"ssid\"><option value=\"\">Select from scan</option>{}</select>\
<label>or enter SSID manually</label>\
<input name=\"ssid_manual\" placeholder=\"MyWiFi\">\
<label>Wi-Fi Password</label>\
<input name=\"pass\" type=\"password\" placeholder=\"Password\">\
<label>API Endpoint URL</label>\
<input name=\"api\" type=\"text\" placeholder=\"https://example.com/heartbeat\">\
<button type=\"submit\">Save &amp; Connect</button>\
</form>\
<p class=\"muted\">Tip: Hold the device button for 30 seconds at power-up to factory reset.</p>",
        options
    );
    document("ESP32 Setup", &body)
}

/// Shown after the submitted network was joined and saved.
pub fn success_page(ip: Option<Ipv4Addr>) -> String {
    let ip = ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
    document(
        "Connected",
        &format!("<h2>Connected!</h2><p>IP: {}</p><p>Rebooting&hellip;</p>", ip),
    )
}

/// Shown when the submitted network could not be joined.
pub fn failure_page() -> String {
    document(
        "Failed",
        "<h2>Failed to connect.</h2><p>Please go back and check SSID/password.</p>",
    )
}

/// Shown when the network was joined but the record could not be saved.
pub fn store_error_page(reason: &str) -> String {
    document(
        "Error",
        &format!(
            "<h2>Could not save settings.</h2><p>{}</p><p>Please go back and try again.</p>",
            escape_html(reason)
        ),
    )
}
