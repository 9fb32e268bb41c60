//! Triggered-alert banners derived from the notification store.

use chrono::Utc;
use serde::Serialize;

use crate::model::{AlertId, AlertType};
use crate::store::NotificationStore;

/// Container that stays in the page; refreshes swap its contents and the
/// dismiss listener is delegated from it.
pub const BANNER_SLOT_ID: &str = "banner-slot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub id: AlertId,
    pub text: String,
    pub alert_type: AlertType,
    pub css_class: String,
    pub new_item_count: usize,
}

/// Banners for every active, non-dismissed notification, ordered by id.
pub fn render_banners(store: &NotificationStore) -> Vec<Banner> {
    store
        .active_notifications()
        .into_values()
        .filter(|record| !store.is_dismissed(&record.id))
        .map(|record| {
            let mut css_class = format!("alert-banner alert-{}", record.alert_type.as_str());
            if record.is_all_items {
                css_class.push_str(" alert-all-items");
            }
            if !record.new_item_ids.is_empty() {
                css_class.push_str(" has-new-items");
            }

            Banner {
                new_item_count: record.new_item_ids.len(),
                id: record.id,
                text: record.text,
                alert_type: record.alert_type,
                css_class,
            }
        })
        .collect()
}

pub fn render_banners_html(banners: &[Banner]) -> String {
    let mut out = String::new();
    out.push_str("<div id=\"triggered-banners\">\n");
    for banner in banners {
        let id = escape_html(banner.id.as_str());
        out.push_str(&format!(
            "<div class=\"{}\" data-alert-id=\"{}\">",
            escape_html(&banner.css_class),
            id
        ));
        out.push_str("<span class=\"banner-text\">");
        out.push_str(&escape_html(&banner.text));
        out.push_str("</span>");
        out.push_str(&format!(
            "<button class=\"banner-dismiss\" data-dismiss=\"{id}\" title=\"Dismiss\">&times;</button>"
        ));
        out.push_str("</div>\n");
    }
    out.push_str("</div>\n");
    out
}

pub fn render_dashboard_html(banners: &[Banner], revision: u64, poll_interval_ms: u64) -> String {
    let now_utc = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Price Alerts</title>\n");
    out.push_str("<style>body{margin:0;font-family:\"Segoe UI\",sans-serif;background:#f4f6f8;color:#182026}.shell{max-width:1100px;margin:0 auto;padding:20px}.hero{background:#14343f;color:#f2f7f9;border-radius:12px;padding:14px 18px}.hero-meta{display:flex;gap:16px;font-size:.9rem}.alert-banner{display:flex;justify-content:space-between;align-items:center;margin-top:10px;padding:10px 14px;border-radius:10px;background:#fff5b8;border:1px solid #e0c96a}.alert-spread{background:#e3f1ff;border-color:#8bb8e8}.alert-spike{background:#ffe3e3;border-color:#e88b8b}.has-new-items .banner-text{font-weight:700}.banner-dismiss{border:0;background:transparent;font-size:1.2rem;cursor:pointer}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Price Alerts</h1><div class=\"hero-meta\">");
    out.push_str(&format!("<span>Triggered: {}</span>", banners.len()));
    out.push_str(&format!("<span id=\"revision\" data-revision=\"{revision}\">Revision: {revision}</span>"));
    out.push_str(&format!("<span>Generated: {}</span>", escape_html(&now_utc)));
    out.push_str("</div></section>\n");
    out.push_str(&format!("<section id=\"{BANNER_SLOT_ID}\">\n"));
    out.push_str(&render_banners_html(banners));
    out.push_str("</section>\n");
    out.push_str(&page_script(poll_interval_ms));
    out.push_str("</main></body></html>\n");
    out
}

fn page_script(poll_interval_ms: u64) -> String {
    let mut out = String::new();
    out.push_str("<script>\n");
    out.push_str(&format!(
        "const slot=document.getElementById('{BANNER_SLOT_ID}');\n"
    ));
    out.push_str("slot.addEventListener('click',async(ev)=>{const btn=ev.target.closest('[data-dismiss]');if(!btn)return;const id=btn.dataset.dismiss;const banner=btn.closest('.alert-banner');if(banner)banner.remove();await fetch('/notifications/'+encodeURIComponent(id)+'/dismiss',{method:'POST'});});\n");
    out.push_str("async function refresh(){const res=await fetch('/notifications/banners');if(res.ok){slot.innerHTML=await res.text();}}\n");
    out.push_str("document.addEventListener('visibilitychange',()=>{if(!document.hidden){fetch('/poll/refresh',{method:'POST'}).then(refresh);}});\n");
    out.push_str("window.addEventListener('pageshow',(ev)=>{if(ev.persisted){fetch('/notifications/restore',{method:'POST'}).then(refresh);}});\n");
    out.push_str(&format!("setInterval(refresh, {poll_interval_ms});\n"));
    out.push_str("</script>\n");
    out
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
