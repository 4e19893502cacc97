//! Notification message catalogue (Polish and English).

/// Language used when a setting names one we do not ship.
pub const DEFAULT_LANGUAGE: &str = "pl";

#[derive(Debug, Clone, Copy)]
pub struct Messages {
    pub speedtest_title: &'static str,
    pub watchdog_up_title: &'static str,
    pub watchdog_down_title: &'static str,
    pub test_title: &'static str,
    pub test_body: &'static str,
    up_body: &'static str,
    down_body: &'static str,
}

const PL: Messages = Messages {
    speedtest_title: "🚀 Nowy wynik Speedtest",
    watchdog_up_title: "🟢 Watchdog ONLINE",
    watchdog_down_title: "🔴 Watchdog OFFLINE",
    test_title: "Test Powiadomienia",
    test_body: "To jest testowe powiadomienie ze SpeedtestLog. 🚀",
    up_body: "Ping Watchdog: Cel {target} jest teraz ONLINE.",
    down_body: "Ping Watchdog: Cel {target} jest teraz OFFLINE.",
};

const EN: Messages = Messages {
    speedtest_title: "🚀 New Speedtest Result",
    watchdog_up_title: "🟢 Watchdog ONLINE",
    watchdog_down_title: "🔴 Watchdog OFFLINE",
    test_title: "Notification Test",
    test_body: "This is a test notification from SpeedtestLog. 🚀",
    up_body: "Ping Watchdog: Target {target} is now ONLINE.",
    down_body: "Ping Watchdog: Target {target} is now OFFLINE.",
};

pub fn is_supported(lang: &str) -> bool {
    matches!(lang, "pl" | "en")
}

pub fn messages(lang: &str) -> &'static Messages {
    match lang {
        "en" => &EN,
        _ => &PL,
    }
}

impl Messages {
    /// Body shared by both languages.
    pub fn speedtest_body(&self, download: f64, upload: f64, ping: f64) -> String {
        format!("Download: {download} Mbps, Upload: {upload} Mbps, Ping: {ping} ms.")
    }

    pub fn watchdog_body(&self, target: &str, online: bool) -> String {
        let template = if online { self.up_body } else { self.down_body };
        template.replace("{target}", target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_language_falls_back_to_polish() {
        assert_eq!(messages("de").test_title, messages("pl").test_title);
        assert_eq!(messages("en").test_title, "Notification Test");
    }

    #[test]
    fn test_watchdog_body_interpolates_target() {
        assert_eq!(
            messages("en").watchdog_body("1.1.1.1", false),
            "Ping Watchdog: Target 1.1.1.1 is now OFFLINE."
        );
        assert_eq!(
            messages("pl").watchdog_body("8.8.8.8", true),
            "Ping Watchdog: Cel 8.8.8.8 jest teraz ONLINE."
        );
    }

    #[test]
    fn test_speedtest_body() {
        assert_eq!(
            messages("pl").speedtest_body(100.0, 20.5, 12.3),
            "Download: 100 Mbps, Upload: 20.5 Mbps, Ping: 12.3 ms."
        );
    }
}
