//! DIDL-Lite metadata sent along with `SetAVTransportURI`.
//!
//! Renderers show `dc:title` on their display. The stream is a live
//! broadcast, so the item class is `audioBroadcast`.

use crate::protocol_constants::{APP_NAME, CAST_STREAM_CONTENT_TYPE};
use crate::utils::escape_xml;

/// Formats DIDL-Lite metadata for a live stream played on `sink_name`.
pub(crate) fn format_didl_lite(stream_url: &str, sink_name: &str) -> String {
    let title = format!("{} • {}", sink_name, APP_NAME);

    let mut didl = String::from(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
    );
    didl.push_str(r#"<item id="0" parentID="-1" restricted="true">"#);
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(&title)));
    didl.push_str(&format!("<dc:creator>{}</dc:creator>", escape_xml(APP_NAME)));
    didl.push_str("<upnp:class>object.item.audioItem.audioBroadcast</upnp:class>");
    didl.push_str(&format!(
        r#"<res protocolInfo="http-get:*:{}:*">{}</res>"#,
        CAST_STREAM_CONTENT_TYPE,
        escape_xml(stream_url)
    ));
    didl.push_str("</item></DIDL-Lite>");

    didl
}
