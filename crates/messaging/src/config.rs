use chrono::Duration;

/// Policy knobs for the messaging core. Built once at start-up and shared
/// read-only by every operation.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// How long after creation a sender may still edit a message.
    pub edit_window: Duration,
    /// Lifetime of a typing indicator.
    pub typing_ttl: Duration,
    /// Messages loaded per dialog when searching.
    pub search_scan_limit: u32,
    /// Nesting depth for reply/forward previews in message views.
    pub max_reference_depth: usize,
    pub notification_queue_capacity: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub attachments: AttachmentPolicy,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            edit_window: Duration::minutes(15),
            typing_ttl: Duration::seconds(10),
            search_scan_limit: 1000,
            max_reference_depth: 3,
            notification_queue_capacity: 1024,
            default_page_size: 50,
            max_page_size: 200,
            attachments: AttachmentPolicy::default(),
        }
    }
}

impl MessagingConfig {
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    pub max_file_bytes: u64,
    /// Exact types (`image/png`) or wildcard families (`image/*`).
    pub allowed_mime_types: Vec<String>,
    pub max_files_per_message: usize,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: 20 * 1024 * 1024,
            allowed_mime_types: [
                "image/*",
                "video/*",
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "text/plain",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_files_per_message: 10,
        }
    }
}

impl AttachmentPolicy {
    pub fn allows_mime(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        self.allowed_mime_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(family) => mime_type
                    .split_once('/')
                    .is_some_and(|(prefix, _)| prefix == family),
                None => *allowed == mime_type,
            }
        })
    }
}
