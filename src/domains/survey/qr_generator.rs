use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, Luma};
use qrcode::QrCode;
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::Cursor;

use super::models::SurveyError;

/// Bytes aleatorios por token (128 bits)
pub const TOKEN_BYTES: usize = 16;

const DEFAULT_SMS_MESSAGE: &str = "¡Gracias por participar en la votación!\nAbre este enlace para registrar tu voto:";

/// Configuración del QR y de los enlaces
#[derive(Debug, Clone)]
pub struct QrConfig {
    /// Tamaño mínimo del QR en píxeles
    pub size: u32,
    /// Base URL pública para los enlaces de redención
    pub landing_base_url: String,
    /// Horas hasta la expiración del token
    pub expiration_hours: i64,
    /// Texto del SMS antes de la URL
    pub sms_message: String,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            size: 512,
            landing_base_url: "http://localhost:8000".to_string(),
            expiration_hours: 24,
            sms_message: DEFAULT_SMS_MESSAGE.to_string(),
        }
    }
}

impl QrConfig {
    pub fn from_app_config(config: &shared::Config) -> Self {
        Self {
            size: config.survey.qr_size_px,
            landing_base_url: config.app.public_base_url.clone(),
            expiration_hours: config.survey.token_expiry_hours,
            sms_message: config
                .survey
                .sms_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SMS_MESSAGE.to_string()),
        }
    }
}

/// Generador de tokens, enlaces SMS e imágenes QR
pub struct QrGenerator {
    pub config: QrConfig,
}

impl QrGenerator {
    pub fn new(config: QrConfig) -> Self {
        Self { config }
    }

    /// Token opaco: 128 bits del CSPRNG del sistema en hexadecimal
    pub fn generate_token(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Calcula la expiración del token a partir de `now`
    pub fn calculate_expiration(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SurveyError> {
        Duration::try_hours(self.config.expiration_hours)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| {
                SurveyError::Internal(format!(
                    "token expiry of {} hours overflows the timestamp range",
                    self.config.expiration_hours
                ))
            })
    }

    /// Ruta relativa de redención
    pub fn redemption_path(&self, token: &str) -> String {
        format!("/s/{}", token)
    }

    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}{}", self.config.landing_base_url.trim_end_matches('/'), path)
    }

    pub fn sms_body(&self, redeem_url: &str) -> String {
        format!("{}\n{}", self.config.sms_message, redeem_url)
    }

    /// `sms:<número>?&body=<texto>`; el `?&` funciona tanto en iOS como en Android
    pub fn sms_deep_link(&self, phone_digits: &str, body: &str) -> String {
        format!("sms:{}?&body={}", phone_digits, urlencoding::encode(body))
    }

    /// Renderiza cualquier payload como PNG
    pub fn render_png(&self, payload: &str) -> Result<Vec<u8>> {
        let qr = QrCode::new(payload.as_bytes()).context("Error al crear QR code")?;

        let qr_image = qr
            .render::<Luma<u8>>()
            .min_dimensions(self.config.size, self.config.size)
            .build();

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(qr_image)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .context("Error al escribir imagen PNG")?;

        Ok(buffer.into_inner())
    }
}

/// Deja sólo dígitos; exige entre 10 y 15
pub fn normalize_phone(raw: &str) -> Result<String, SurveyError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < 10 || digits.len() > 15 {
        return Err(SurveyError::InvalidInput(
            "Ingresa un número de teléfono válido".to_string(),
        ));
    }

    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let generator = QrGenerator::new(QrConfig::default());
        let token = generator.generate_token();

        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_token_uniqueness() {
        let generator = QrGenerator::new(QrConfig::default());
        let tokens: std::collections::HashSet<String> =
            (0..1000).map(|_| generator.generate_token()).collect();

        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_expiration_uses_configured_hours() {
        let generator = QrGenerator::new(QrConfig::default());
        let now = Utc::now();

        assert_eq!(generator.calculate_expiration(now).unwrap() - now, Duration::hours(24));
    }

    #[test]
    fn test_expiration_overflow_is_an_error() {
        let now = Utc::now();

        for hours in [10_000_000_000, i64::MAX] {
            let generator = QrGenerator::new(QrConfig {
                expiration_hours: hours,
                ..QrConfig::default()
            });
            assert!(matches!(
                generator.calculate_expiration(now),
                Err(SurveyError::Internal(_))
            ));
        }
    }

    #[test]
    fn test_url_generation() {
        let generator = QrGenerator::new(QrConfig {
            landing_base_url: "https://votos.example.com/".to_string(),
            ..QrConfig::default()
        });

        let path = generator.redemption_path("abc123");
        assert_eq!(path, "/s/abc123");
        assert_eq!(generator.absolute_url(&path), "https://votos.example.com/s/abc123");
    }

    #[test]
    fn test_sms_deep_link_encodes_body() {
        let generator = QrGenerator::new(QrConfig::default());
        let link = generator.sms_deep_link("01012345678", "Hola mundo\nhttps://x.y/s/1?a=b&c");

        assert_eq!(
            link,
            "sms:01012345678?&body=Hola%20mundo%0Ahttps%3A%2F%2Fx.y%2Fs%2F1%3Fa%3Db%26c"
        );
    }

    #[test]
    fn test_sms_body_ends_with_url() {
        let generator = QrGenerator::new(QrConfig {
            sms_message: "Vota aquí:".to_string(),
            ..QrConfig::default()
        });

        assert_eq!(generator.sms_body("http://h/s/t"), "Vota aquí:\nhttp://h/s/t");
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("010-1234-5678").unwrap(), "01012345678");
        assert_eq!(normalize_phone("+507 6123 4567").unwrap(), "50761234567");
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("1234567890123456").is_err());
        assert!(normalize_phone("").is_err());
    }

    #[test]
    fn test_render_png_signature() {
        let generator = QrGenerator::new(QrConfig {
            size: 128,
            ..QrConfig::default()
        });
        let png = generator.render_png("sms:01012345678?&body=hola").unwrap();

        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
