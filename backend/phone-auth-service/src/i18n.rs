/// User-facing message catalog
///
/// Every outcome a caller can see is rendered here so handlers and errors never
/// hard-code display text. English is the fallback; Persian covers the
/// original user base.
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Fa,
}

impl Locale {
    /// Pick the first supported language tag from an `Accept-Language` value
    pub fn from_accept_language(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Locale::default();
        };

        header
            .split(',')
            .filter_map(|part| part.split(';').next())
            .map(|tag| tag.trim().to_ascii_lowercase())
            .find_map(|tag| match tag.split('-').next() {
                Some("fa") => Some(Locale::Fa),
                Some("en") => Some(Locale::En),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Which rolling ceiling tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    PhoneHour,
    PhoneDay,
    IpHour,
    IpDay,
}

impl QuotaScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaScope::PhoneHour => "phone_hour",
            QuotaScope::PhoneDay => "phone_day",
            QuotaScope::IpHour => "ip_hour",
            QuotaScope::IpDay => "ip_day",
        }
    }
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renderable message with its parameters
#[derive(Debug, Clone)]
pub enum Text<'a> {
    OtpSent { expires_in: i64 },
    OtpSmsBody { code: &'a str, minutes: i64 },
    Validation { detail: &'a str },
    CaptchaInvalid,
    RateLimited { retry_after: u64 },
    Cooldown { retry_after: u64 },
    Quota { scope: QuotaScope },
    ProviderFailure,
    SmsNotConfigured,
    InvalidCode,
    InvalidToken,
    AccountDisabled,
    Internal,
}

impl Text<'_> {
    pub fn render(&self, locale: Locale) -> String {
        match locale {
            Locale::En => self.render_en(),
            Locale::Fa => self.render_fa(),
        }
    }

    fn render_en(&self) -> String {
        match self {
            Text::OtpSent { expires_in } => format!(
                "Verification code sent. It expires in {} seconds.",
                expires_in
            ),
            Text::OtpSmsBody { code, minutes } => format!(
                "Your verification code is {}. It expires in {} minutes.",
                code, minutes
            ),
            Text::Validation { detail } => format!("Invalid request: {}", detail),
            Text::CaptchaInvalid => "The security code is incorrect or has expired.".to_string(),
            Text::RateLimited { retry_after } => format!(
                "Too many attempts. Please try again in {} seconds.",
                retry_after
            ),
            Text::Cooldown { retry_after } => format!(
                "A code was sent recently. You can request a new one in {} seconds.",
                retry_after
            ),
            Text::Quota { scope } => match scope {
                QuotaScope::PhoneHour => {
                    "Too many codes requested for this number in the last hour.".to_string()
                }
                QuotaScope::PhoneDay => {
                    "Daily code limit reached for this number. Try again tomorrow.".to_string()
                }
                QuotaScope::IpHour => {
                    "Too many codes requested from your network in the last hour.".to_string()
                }
                QuotaScope::IpDay => {
                    "Daily code limit reached for your network. Try again tomorrow.".to_string()
                }
            },
            Text::ProviderFailure => {
                "We could not send the verification code. Please try again later.".to_string()
            }
            Text::SmsNotConfigured => "SMS delivery is currently unavailable.".to_string(),
            Text::InvalidCode => "The verification code is invalid or has expired.".to_string(),
            Text::InvalidToken => "Your session is invalid or has expired.".to_string(),
            Text::AccountDisabled => "This account has been disabled.".to_string(),
            Text::Internal => "Internal server error".to_string(),
        }
    }

    fn render_fa(&self) -> String {
        match self {
            Text::OtpSent { expires_in } => format!(
                "کد تایید ارسال شد. این کد تا {} ثانیه معتبر است.",
                expires_in
            ),
            Text::OtpSmsBody { code, minutes } => format!(
                "کد تایید شما: {}\nاعتبار: {} دقیقه",
                code, minutes
            ),
            Text::Validation { detail } => format!("درخواست نامعتبر است: {}", detail),
            Text::CaptchaInvalid => "کد امنیتی اشتباه است یا منقضی شده است.".to_string(),
            Text::RateLimited { retry_after } => format!(
                "تعداد تلاش‌ها بیش از حد مجاز است. لطفاً {} ثانیه دیگر تلاش کنید.",
                retry_after
            ),
            Text::Cooldown { retry_after } => format!(
                "کد به‌تازگی ارسال شده است. {} ثانیه دیگر می‌توانید دوباره درخواست دهید.",
                retry_after
            ),
            Text::Quota { scope } => match scope {
                QuotaScope::PhoneHour => {
                    "سقف درخواست کد برای این شماره در یک ساعت گذشته پر شده است.".to_string()
                }
                QuotaScope::PhoneDay => {
                    "سقف روزانه درخواست کد برای این شماره پر شده است.".to_string()
                }
                QuotaScope::IpHour => {
                    "سقف درخواست کد از شبکه شما در یک ساعت گذشته پر شده است.".to_string()
                }
                QuotaScope::IpDay => "سقف روزانه درخواست کد از شبکه شما پر شده است.".to_string(),
            },
            Text::ProviderFailure => "ارسال کد تایید ممکن نشد. لطفاً بعداً تلاش کنید.".to_string(),
            Text::SmsNotConfigured => "سرویس پیامک در حال حاضر در دسترس نیست.".to_string(),
            Text::InvalidCode => "کد تایید نامعتبر است یا منقضی شده است.".to_string(),
            Text::InvalidToken => "نشست شما نامعتبر است یا منقضی شده است.".to_string(),
            Text::AccountDisabled => "این حساب کاربری غیرفعال شده است.".to_string(),
            Text::Internal => "خطای داخلی سرور".to_string(),
        }
    }
}
