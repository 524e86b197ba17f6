use qrcode::{render::svg, EcLevel, QrCode};

/// Renders `payload` as a standalone SVG QR code.
pub fn render_svg(payload: &str) -> anyhow::Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(|e| anyhow::anyhow!("cannot encode QR payload: {}", e))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(240, 240)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_svg() {
        let svg = render_svg("http://localhost:8080/api/secure-entry/SE-ABCD-EFGH").unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("#000000"));
    }

    #[test]
    fn test_payload_too_large() {
        assert!(render_svg(&"x".repeat(8000)).is_err());
    }
}
