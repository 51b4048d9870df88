//! Status page: `GET /`

use axum::{extract::State, response::Html};

use crate::api::ApiState;

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// HTML listing of the synchronised devices
pub async fn status_page(State(state): State<ApiState>) -> Html<String> {
    let rows = state.registry.summaries().await;

    let mut html = format!(
        "<html><head><title>{0}</title></head><body><h1>{0}</h1>",
        escape(&state.source)
    );
    html.push_str(&format!(
        "<p>{} devices synchronised, up {}s</p>",
        rows.len(),
        state.started_at.elapsed().as_secs()
    ));
    html.push_str("<table><tr><th>ID</th><th>Name</th><th>UUID</th><th>Type</th></tr>");
    for row in rows {
        let id = row.id.map(|id| id.to_string()).unwrap_or_default();
        let device_type = match (&row.device_type, row.bridged) {
            (Some(t), true) => escape(t),
            (Some(t), false) => format!("{} (not supported)", escape(t)),
            (None, _) => "cached".to_string(),
        };
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            id,
            escape(&row.display_name),
            escape(&row.uuid),
            device_type
        ));
    }
    html.push_str("</table></body></html>");

    Html(html)
}
