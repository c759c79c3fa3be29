//! Contact form: validation, email rendering and relay.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MailConfig, NetworkConfig};
use crate::traits::Mailer;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s()+-]{6,20}$").expect("phone pattern is valid"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

pub const GENERIC_INVALID: &str = "Datos inválidos.";
pub const MAIL_NOT_CONFIGURED: &str = "Falta configuración del correo en el servidor.";
pub const SEND_FAILED: &str = "No pudimos enviar el mensaje. Intenta de nuevo.";

/// Form topic, posted as its kebab-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Oracion,
    Consejeria,
    MasInfo,
    Sugerencia,
    Otro,
}

impl Topic {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oracion" => Some(Self::Oracion),
            "consejeria" => Some(Self::Consejeria),
            "mas-info" => Some(Self::MasInfo),
            "sugerencia" => Some(Self::Sugerencia),
            "otro" => Some(Self::Otro),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Oracion => "Petición de Oración",
            Self::Consejeria => "Consejería",
            Self::MasInfo => "Más Información",
            Self::Sugerencia => "Sugerencia",
            Self::Otro => "Otro",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactMethod {
    Phone,
    Email,
    Visit,
}

impl ContactMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "phone" => Some(Self::Phone),
            "email" => Some(Self::Email),
            "visit" => Some(Self::Visit),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Phone => "Llamada telefónica",
            Self::Email => "Correo electrónico",
            Self::Visit => "Visita a casa",
        }
    }
}

/// Raw form fields as posted by the browser. Absent fields are empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactSubmission {
    pub name: String,
    pub topic: String,
    pub contact_method: String,
    pub country_code: String,
    pub phone: String,
    pub email: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub message: String,
    /// Honeypot; humans never see it.
    pub website: String,
}

/// A submission that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidContact {
    pub name: String,
    pub topic: Topic,
    pub contact_method: ContactMethod,
    pub country_code: String,
    pub phone: String,
    pub email: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} invalid field(s)", .issues.len())]
pub struct ValidationErrors {
    pub issues: Vec<FieldIssue>,
}

impl ValidationErrors {
    /// Message of the first issue, shown to the submitter.
    pub fn first_message(&self) -> &'static str {
        self.issues.first().map(|i| i.message).unwrap_or(GENERIC_INVALID)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

impl ContactSubmission {
    pub fn validate(&self) -> Result<ValidContact, ValidationErrors> {
        let mut issues = Vec::new();
        let mut issue = |field: &'static str, message: &'static str| {
            issues.push(FieldIssue { field, message });
        };

        if self.name.chars().count() < 2 {
            issue("name", "Por favor escribe tu nombre.");
        }

        let topic = Topic::parse(&self.topic);
        if topic.is_none() {
            issue("topic", "Selecciona un tema.");
        }

        let method = ContactMethod::parse(&self.contact_method);
        if method.is_none() {
            issue("contactMethod", "Selecciona un método de contacto.");
        }

        let phone = self.phone.trim();
        if !phone.is_empty() && !PHONE_RE.is_match(phone) {
            issue("phone", "Teléfono inválido.");
        }

        let email = self.email.trim();
        if !email.is_empty() && !EMAIL_RE.is_match(email) {
            issue("email", "Correo inválido.");
        }

        if self.message.chars().count() < 10 {
            issue("message", "Cuéntanos un poco más, por favor (mín. 10 caracteres).");
        }

        if !self.website.is_empty() {
            issue("website", "Bot detectado.");
        }

        match method {
            Some(ContactMethod::Phone) => {
                if phone.is_empty() {
                    issue("phone", "Incluye tu número de teléfono.");
                }
                if self.country_code.trim().is_empty() {
                    issue("countryCode", "Selecciona el código internacional.");
                }
            }
            Some(ContactMethod::Email) => {
                if email.is_empty() {
                    issue("email", "Incluye tu correo electrónico.");
                }
            }
            Some(ContactMethod::Visit) => {
                if self.address_line1.is_empty()
                    || self.city.is_empty()
                    || self.state.is_empty()
                    || self.postal_code.is_empty()
                {
                    issue(
                        "addressLine1",
                        "Incluye la dirección completa (calle, ciudad, estado/provincia y código postal).",
                    );
                }
            }
            None => {}
        }

        match (topic, method) {
            (Some(topic), Some(contact_method)) if issues.is_empty() => Ok(ValidContact {
                name: self.name.clone(),
                topic,
                contact_method,
                country_code: self.country_code.clone(),
                phone: phone.to_string(),
                email: email.to_string(),
                address_line1: self.address_line1.clone(),
                address_line2: self.address_line2.clone(),
                city: self.city.clone(),
                state: self.state.clone(),
                postal_code: self.postal_code.clone(),
                country: self.country.clone(),
                message: self.message.clone(),
            }),
            _ => Err(ValidationErrors { issues }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

impl ValidContact {
    /// `"+1 914 555 0100"`, or empty when no phone was given.
    pub fn full_phone(&self) -> String {
        if self.phone.is_empty() {
            return String::new();
        }
        format!("{} {}", self.country_code, self.phone).trim().to_string()
    }

    /// Postal address lines, whatever the preferred contact method.
    pub fn address_block(&self) -> Option<String> {
        let city_state = [non_blank(&self.city), non_blank(&self.state)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

        let parts: Vec<&str> = [
            non_blank(&self.address_line1),
            non_blank(&self.address_line2),
            non_blank(&city_state),
            non_blank(&self.postal_code),
            non_blank(&self.country),
        ]
        .into_iter()
        .flatten()
        .collect();

        (!parts.is_empty()).then(|| parts.join("\n"))
    }

    /// Plain-text notification for the office inbox.
    pub fn render_email(&self, site_name: &str, from: &str, to: &str) -> EmailMessage {
        let phone = self.full_phone();
        let address = self
            .address_block()
            .map(|block| format!("\nDirección:\n{block}"))
            .unwrap_or_default();

        let lines = [
            "Nuevo mensaje del formulario de contacto".to_string(),
            format!("Nombre: {}", self.name),
            format!("Tema: {}", self.topic.label()),
            format!("Método de contacto: {}", self.contact_method.label()),
            format!("Correo: {}", non_blank(&self.email).unwrap_or("—")),
            format!("Teléfono: {}", non_blank(&phone).unwrap_or("—")),
            address,
            "Mensaje:".to_string(),
            self.message.clone(),
        ];
        let text = lines
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        EmailMessage {
            from: from.to_string(),
            to: to.to_string(),
            subject: format!("Contacto {}: {} — {}", site_name, self.name, self.topic.label()),
            text,
            reply_to: non_blank(&self.email).map(str::to_string),
        }
    }
}

// ==================== Resend Mailer ====================

#[derive(Debug, Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

/// Sends mail through the Resend HTTP API.
#[derive(Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for ResendMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResendMailer")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl ResendMailer {
    pub fn new(api_url: &str, api_key: String, network_config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network_config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network_config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/emails", api_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let payload = ResendPayload {
            from: &message.from,
            to: [&message.to],
            subject: &message.subject,
            text: &message.text,
            reply_to: message.reply_to.as_deref(),
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to mail API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Mail API returned error status: {} {}", status, detail.trim());
        }

        Ok(())
    }
}

// ==================== Relay ====================

/// Sender and recipient for contact notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRoute {
    pub from: String,
    pub to: String,
}

/// The two-valued result shown by the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldIssue>,
}

impl ContactOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
            fields: Vec::new(),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            ok: false,
            error: Some(message.to_string()),
            fields: Vec::new(),
        }
    }

    pub fn invalid(errors: ValidationErrors) -> Self {
        Self {
            ok: false,
            error: Some(errors.first_message().to_string()),
            fields: errors.issues,
        }
    }
}

/// Validates submissions and forwards them to the office inbox.
#[derive(Clone)]
pub struct ContactRelay {
    mailer: Option<Arc<dyn Mailer>>,
    route: Option<MailRoute>,
    site_name: String,
}

impl ContactRelay {
    pub fn new(mailer: Option<Arc<dyn Mailer>>, route: Option<MailRoute>, site_name: &str) -> Self {
        Self {
            mailer,
            route,
            site_name: site_name.to_string(),
        }
    }

    /// Relay backed by Resend, or an unconfigured relay when secrets are missing.
    pub fn from_config(mail: &MailConfig, network: &NetworkConfig, site_name: &str) -> Result<Self> {
        let mailer: Option<Arc<dyn Mailer>> = match mail.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(Arc::new(ResendMailer::new(
                &mail.api_url,
                key.to_string(),
                network,
            )?)),
            _ => None,
        };

        let route = match (mail.from.as_deref(), mail.to.as_deref()) {
            (Some(from), Some(to)) if !from.is_empty() && !to.is_empty() => Some(MailRoute {
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => None,
        };

        if mailer.is_none() || route.is_none() {
            tracing::warn!("Contact mail relay is not fully configured; submissions will be rejected");
        }

        Ok(Self::new(mailer, route, site_name))
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some() && self.route.is_some()
    }

    pub async fn submit(&self, form: &ContactSubmission) -> ContactOutcome {
        let contact = match form.validate() {
            Ok(contact) => contact,
            Err(errors) => {
                tracing::debug!("Contact submission rejected: {}", errors);
                return ContactOutcome::invalid(errors);
            }
        };

        let (Some(mailer), Some(route)) = (&self.mailer, &self.route) else {
            tracing::error!("Contact submission dropped: mail relay not configured");
            return ContactOutcome::failure(MAIL_NOT_CONFIGURED);
        };

        let message = contact.render_email(&self.site_name, &route.from, &route.to);
        match mailer.send(&message).await {
            Ok(()) => {
                tracing::info!("Contact message relayed ({})", contact.topic.label());
                ContactOutcome::success()
            }
            Err(e) => {
                tracing::error!("Failed to relay contact message: {:#}", e);
                ContactOutcome::failure(SEND_FAILED)
            }
        }
    }
}
