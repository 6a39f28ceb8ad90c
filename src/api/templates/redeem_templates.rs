//! Vistas HTML de la página de redención.

use chrono::{DateTime, Utc};

use crate::domains::survey::{Redemption, SurveyDefinition};

const DEFAULT_ACCENT: &str = "#6B46C1";

/// Escapa texto para insertarlo en HTML
pub fn html_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Sólo colores `#RGB` / `#RRGGBB`; cualquier otro valor usa el acento por defecto
fn safe_color(color: &str) -> &str {
    let hex = color.strip_prefix('#').unwrap_or("");
    if (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        color
    } else {
        DEFAULT_ACCENT
    }
}

fn page(title: &str, icon: &str, accent: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="robots" content="noindex">
    <title>{title}</title>
</head>
<body style="font-family: Arial, sans-serif; max-width: 480px; margin: 0 auto; padding: 20px; background-color: #f5f5f5;">
    <div style="background: white; padding: 30px; border-radius: 10px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); text-align: center; border-top: 6px solid {accent};">
        <div style="font-size: 48px;">{icon}</div>
        <h1 style="color: #333; margin: 10px 0;">{title}</h1>
        {body}
    </div>
</body>
</html>
"#,
        title = html_escape(title),
        icon = icon,
        accent = safe_color(accent),
        body = body,
    )
}

/// Voto registrado
pub fn redeemed_page(redemption: &Redemption, survey: Option<&SurveyDefinition>) -> String {
    let survey_title = survey
        .map(|s| html_escape(&s.title))
        .unwrap_or_else(|| html_escape(&redemption.token.survey_id));

    let (choice_html, accent) = match &redemption.choice {
        Some(choice) => (
            format!(
                r#"<img src="{image}" alt="{label}" style="max-width: 100%; border-radius: 8px; margin: 15px 0;">
        <p style="font-size: 20px; font-weight: bold; color: {color};">{label}</p>"#,
                image = html_escape(&choice.image),
                label = html_escape(&choice.label),
                color = safe_color(&choice.color),
            ),
            choice.color.as_str(),
        ),
        None => (
            format!(
                r#"<p style="font-size: 20px; font-weight: bold;">Opción {}</p>"#,
                redemption.token.choice_id
            ),
            DEFAULT_ACCENT,
        ),
    };

    let body = format!(
        r#"<p style="color: #666;">{survey_title}</p>
        {choice_html}
        <p style="color: #666;">Tu voto quedó registrado. ¡Gracias por participar!</p>"#
    );

    page("¡Gracias por tu voto!", "✅", accent, &body)
}

pub fn already_used_page() -> String {
    page(
        "Este enlace ya fue utilizado",
        "🔒",
        "#F59E0B",
        r#"<p style="color: #666;">Cada enlace permite votar una sola vez. Tu voto anterior sigue registrado.</p>"#,
    )
}

pub fn expired_page(expired_at: DateTime<Utc>) -> String {
    let body = format!(
        r#"<p style="color: #666;">Este enlace venció el {} (UTC). Solicita uno nuevo para votar.</p>"#,
        expired_at.format("%d/%m/%Y %H:%M")
    );
    page("Este enlace expiró", "⌛", "#9CA3AF", &body)
}

pub fn not_found_page() -> String {
    page(
        "Enlace no válido",
        "❓",
        "#EF4444",
        r#"<p style="color: #666;">No encontramos este enlace. Revisa que esté completo.</p>"#,
    )
}

pub fn error_page() -> String {
    page(
        "Algo salió mal",
        "⚠️",
        "#EF4444",
        r#"<p style="color: #666;">No pudimos registrar tu voto. Intenta nuevamente en unos minutos.</p>"#,
    )
}

/// Fallback para rutas desconocidas
pub fn page_not_found() -> String {
    page(
        "Página no encontrada",
        "🔎",
        DEFAULT_ACCENT,
        r#"<p style="color: #666;">La página que buscas no existe.</p>"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape(r#"<script>alert("x")</script> & 'y'"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt; &amp; &#x27;y&#x27;"
        );
    }

    #[test]
    fn rejects_non_hex_colors() {
        assert_eq!(safe_color("#87CEEB"), "#87CEEB");
        assert_eq!(safe_color("#fff"), "#fff");
        assert_eq!(safe_color("red;background:url(x)"), DEFAULT_ACCENT);
        assert_eq!(safe_color("#12345G"), DEFAULT_ACCENT);
    }

    #[test]
    fn expired_page_shows_date() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let html = expired_page(at);
        assert!(html.contains("01/03/2025 10:30"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }
}
