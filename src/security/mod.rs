// Security middleware: headers, CORS y rate limit de emisión
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::observability::record_rate_limited;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 0 desactiva el límite
    pub requests_per_minute: u32,
    pub window_size: Duration,
    /// Sólo detrás de un proxy propio: usar X-Forwarded-For / X-Real-IP
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            window_size: Duration::from_secs(60),
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug)]
struct ClientWindows {
    requests: HashMap<String, Vec<Instant>>,
    last_sweep: Instant,
}

/// Ventana deslizante por cliente, en memoria
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Mutex<ClientWindows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(ClientWindows {
                requests: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn check_rate_limit(&self, client_id: &str) -> bool {
        self.check_at(client_id, Instant::now())
    }

    fn check_at(&self, client_id: &str, now: Instant) -> bool {
        if self.config.requests_per_minute == 0 {
            return true;
        }

        let window = self.config.window_size;
        let mut clients = self.clients.lock();

        // Una vez por ventana se descartan los clientes sin requests recientes
        if now.saturating_duration_since(clients.last_sweep) >= window {
            clients
                .requests
                .retain(|_, times| times.iter().any(|&t| now.saturating_duration_since(t) < window));
            clients.last_sweep = now;
        }

        let requests = clients.requests.entry(client_id.to_string()).or_default();

        // Limpiar requests fuera de la ventana
        requests.retain(|&time| now.saturating_duration_since(time) < window);

        if requests.len() >= self.config.requests_per_minute as usize {
            return false;
        }

        requests.push(now);
        true
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.lock().requests.len()
    }
}

/// Cabeceras de seguridad calculadas una vez a partir de la configuración
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    content_security_policy: HeaderValue,
}

impl SecurityHeaders {
    /// Las páginas de redención sólo cargan estilos inline e imágenes propias,
    /// del origen público o de los orígenes de imágenes configurados.
    pub fn from_config(config: &shared::Config) -> Self {
        let mut img_src = vec!["'self'".to_string(), "data:".to_string()];
        img_src.extend(origin_of(&config.app.public_base_url));
        for origin in &config.app.image_origins {
            if !img_src.contains(origin) {
                img_src.push(origin.clone());
            }
        }

        let policy = format!(
            "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src {}; object-src 'none'; frame-ancestors 'none';",
            img_src.join(" ")
        );

        let content_security_policy = HeaderValue::from_str(&policy).unwrap_or_else(|_| {
            warn!("Invalid CSP built from config, falling back to 'self' images");
            HeaderValue::from_static(DEFAULT_CSP)
        });

        Self {
            content_security_policy,
        }
    }
}

const DEFAULT_CSP: &str = "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; object-src 'none'; frame-ancestors 'none';";

/// `scheme://host[:port]` de una URL absoluta
fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
    Some(format!("{}://{}", scheme, authority))
}

/// Security headers middleware
pub async fn security_headers_middleware(
    State(security): State<SecurityHeaders>,
    request: Request,
    next: Next,
) -> Response {
    let is_api = request.uri().path().starts_with("/api/");
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        security.content_security_policy,
    );

    // Una URL de token nunca debe quedar en caché
    if !is_api {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store"),
        );
    }

    response
}

/// Rate limit para los endpoints de emisión
pub async fn rate_limiting_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = extract_client_id(&request, state.rate_limiter.config.trust_proxy_headers);

    if !state.rate_limiter.check_rate_limit(&client_id) {
        warn!("🚫 Rate limit exceeded for client: {}", client_id);
        record_rate_limited(request.uri().path());
        return shared::AppError::rate_limit("Demasiadas solicitudes. Intenta más tarde.")
            .into_response();
    }

    next.run(request).await
}

fn extract_client_id(request: &Request, trust_proxy_headers: bool) -> String {
    // IP real detrás de un reverse proxy de confianza
    if trust_proxy_headers {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = request
            .headers()
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    // Dirección del socket (serve con into_make_service_with_connect_info)
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// CORS: la página de encuesta puede vivir en otro origen
pub fn get_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_blocks_after_quota() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 3,
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        assert!(limiter.check_at("1.2.3.4", now));
        assert!(limiter.check_at("1.2.3.4", now));
        assert!(limiter.check_at("1.2.3.4", now));
        assert!(!limiter.check_at("1.2.3.4", now));
        // Otro cliente no se ve afectado
        assert!(limiter.check_at("5.6.7.8", now));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        assert!(limiter.check_at("c", now));
        assert!(!limiter.check_at("c", now + Duration::from_secs(30)));
        assert!(limiter.check_at("c", now + Duration::from_secs(61)));
    }

    #[test]
    fn zero_disables_limit() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 0,
            ..RateLimitConfig::default()
        });
        for _ in 0..1000 {
            assert!(limiter.check_rate_limit("c"));
        }
    }

    #[test]
    fn idle_clients_are_evicted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 5,
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        for i in 0..100 {
            assert!(limiter.check_at(&format!("10.0.0.{i}"), now));
        }
        assert_eq!(limiter.tracked_clients(), 100);

        // Pasada la ventana sólo queda el cliente que vuelve
        assert!(limiter.check_at("10.0.0.1", now + Duration::from_secs(61)));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    fn request_from(addr: &str, forwarded_for: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/qr");
        if let Some(ip) = forwarded_for {
            builder = builder.header("x-forwarded-for", ip);
        }
        let mut request = builder.body(axum::body::Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        request
    }

    #[test]
    fn client_id_uses_socket_address_by_default() {
        let request = request_from("203.0.113.7:51000", Some("1.1.1.1"));
        assert_eq!(extract_client_id(&request, false), "203.0.113.7");
    }

    #[test]
    fn client_id_honours_forwarded_for_when_trusted() {
        let request = request_from("10.0.0.2:51000", Some("198.51.100.4, 10.0.0.2"));
        assert_eq!(extract_client_id(&request, true), "198.51.100.4");

        let request = request_from("10.0.0.2:51000", None);
        assert_eq!(extract_client_id(&request, true), "10.0.0.2");
    }

    #[test]
    fn csp_allows_public_and_configured_image_origins() {
        let mut config = shared::Config::default();
        config.app.public_base_url = "https://votos.example.com".to_string();
        config.app.image_origins = vec!["https://cdn.example.com".to_string()];

        let csp = SecurityHeaders::from_config(&config).content_security_policy;
        let csp = csp.to_str().unwrap();
        assert!(csp.contains("img-src 'self' data: https://votos.example.com https://cdn.example.com;"));
        assert!(csp.contains("frame-ancestors 'none'"));
    }

    #[test]
    fn origin_strips_path() {
        assert_eq!(origin_of("http://localhost:8000/app/").as_deref(), Some("http://localhost:8000"));
        assert_eq!(origin_of("localhost"), None);
    }
}
