use donation_watch_common::config::NotifyConfig;
use donation_watch_detector::DonationRegion;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to read image {0}: {1}")]
    ReadImage(String, std::io::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected with status {0}")]
    Status(u16),
}

/// Something worth telling the outside world about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Donation {
        id: String,
        seq: u64,
        image_path: PathBuf,
        region: DonationRegion,
    },
    Screenshot {
        image_path: PathBuf,
    },
}

impl Notification {
    pub fn image_path(&self) -> &PathBuf {
        match self {
            Notification::Donation { image_path, .. } => image_path,
            Notification::Screenshot { image_path } => image_path,
        }
    }

    pub fn caption(&self) -> String {
        match self {
            Notification::Donation { id, .. } => format!("donation {id}"),
            Notification::Screenshot { .. } => "screenshot".to_string(),
        }
    }
}

/// Consumer of saved donation and screenshot images.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;

    fn name(&self) -> &str;
}

/// Logs every notification. Used when no `[notify]` section is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Donation {
                id,
                seq,
                image_path,
                region,
            } => info!(
                id,
                seq,
                path = %image_path.display(),
                width = region.width(),
                height = region.height(),
                "donation detected"
            ),
            Notification::Screenshot { image_path } => {
                info!(path = %image_path.display(), "screenshot taken")
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Posts images to a Telegram chat through the Bot API `sendPhoto` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: send_photo_url(&config.api_base, &config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

fn send_photo_url(api_base: &str, bot_token: &str) -> String {
    format!("{}/bot{bot_token}/sendPhoto", api_base.trim_end_matches('/'))
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let path = notification.image_path();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| NotifyError::ReadImage(path.display().to_string(), e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());

        let photo = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", notification.caption())
            .part("photo", photo);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        debug!(chat_id = self.chat_id, "photo sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// The notifier chosen at startup from configuration.
pub enum ConfiguredNotifier {
    Log(LogNotifier),
    Telegram(TelegramNotifier),
}

impl ConfiguredNotifier {
    pub fn from_config(config: Option<&NotifyConfig>) -> Result<Self, NotifyError> {
        match config {
            Some(c) => Ok(Self::Telegram(TelegramNotifier::new(c)?)),
            None => Ok(Self::Log(LogNotifier)),
        }
    }
}

impl Notifier for ConfiguredNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self {
            Self::Log(n) => n.notify(notification).await,
            Self::Telegram(n) => n.notify(notification).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Log(n) => n.name(),
            Self::Telegram(n) => n.name(),
        }
    }
}

/// Deliver notifications until every sender is dropped. Failures are logged
/// and the loop moves on.
pub async fn run_notifier<N: Notifier>(notifier: N, mut rx: mpsc::Receiver<Notification>) {
    info!(notifier = notifier.name(), "notifier started");
    while let Some(notification) = rx.recv().await {
        if let Err(e) = notifier.notify(&notification).await {
            warn!(
                notifier = notifier.name(),
                path = %notification.image_path().display(),
                error = %e,
                "failed to deliver notification"
            );
        }
    }
    info!(notifier = notifier.name(), "notifier stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Notifier for Recording {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(notification.caption());
            if matches!(notification, Notification::Screenshot { .. }) {
                return Err(NotifyError::Status(500));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn donation(id: &str) -> Notification {
        Notification::Donation {
            id: id.to_string(),
            seq: 1,
            image_path: PathBuf::from(format!("donates/{id}.png")),
            region: DonationRegion {
                from_x: 0,
                to_x: 600,
                from_y: 10,
                to_y: 90,
            },
        }
    }

    #[tokio::test]
    async fn delivers_until_senders_drop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(8);
        tx.send(donation("1_1")).await.unwrap();
        tx.send(Notification::Screenshot {
            image_path: PathBuf::from("screenshots/5.png"),
        })
        .await
        .unwrap();
        tx.send(donation("2_20")).await.unwrap();
        drop(tx);

        run_notifier(Recording(Arc::clone(&seen)), rx).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["donation 1_1", "screenshot", "donation 2_20"]
        );
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        assert!(LogNotifier.notify(&donation("1_1")).await.is_ok());
    }

    #[test]
    fn telegram_endpoint() {
        assert_eq!(
            send_photo_url("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendPhoto"
        );
    }

    #[tokio::test]
    async fn telegram_reports_missing_image() {
        let config = NotifyConfig {
            bot_token: "t".into(),
            chat_id: "c".into(),
            api_base: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
        };
        let notifier = ConfiguredNotifier::from_config(Some(&config)).unwrap();
        assert_eq!(notifier.name(), "telegram");
        let err = notifier.notify(&donation("missing")).await.unwrap_err();
        assert!(matches!(err, NotifyError::ReadImage(..)));
    }
}
