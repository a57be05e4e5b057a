//! Built-in browser definitions per platform.
//!
//! Mirrors the declarative `family → flavour → platform` table the project
//! ships; runtime additions go through [`super::Registry::add`].

use super::BrowserDef;

#[cfg(target_os = "linux")]
pub(super) fn defined_browsers() -> Vec<BrowserDef> {
    vec![
        BrowserDef::mozilla(
            "firefox",
            "~/.mozilla/firefox",
            "~/snap/firefox/common/.mozilla/firefox",
            "~/.var/app/org.mozilla.firefox/.mozilla/firefox",
        ),
        BrowserDef::mozilla(
            "librewolf",
            "~/.librewolf",
            "",
            "~/.var/app/io.gitlab.librewolf-community/.librewolf",
        ),
        BrowserDef::chrome("chrome", "~/.config/google-chrome", "", ""),
        BrowserDef::chrome(
            "chromium",
            "~/.config/chromium",
            "~/snap/chromium/common/chromium",
            "~/.var/app/org.chromium.Chromium/config/chromium",
        ),
        BrowserDef::chrome(
            "brave",
            "~/.config/BraveSoftware/Brave-Browser",
            "~/snap/brave/current/.config/BraveSoftware/Brave-Browser",
            "~/.var/app/com.brave.Browser/config/BraveSoftware/Brave-Browser",
        ),
        BrowserDef::chrome("vivaldi", "~/.config/vivaldi", "", ""),
        BrowserDef::qute("qutebrowser", "~/.config/qutebrowser"),
    ]
}

#[cfg(target_os = "macos")]
pub(super) fn defined_browsers() -> Vec<BrowserDef> {
    vec![
        BrowserDef::mozilla("firefox", "~/Library/Application Support/Firefox", "", ""),
        BrowserDef::mozilla("librewolf", "~/Library/Application Support/librewolf", "", ""),
        BrowserDef::chrome(
            "chrome",
            "~/Library/Application Support/Google/Chrome",
            "",
            "",
        ),
        BrowserDef::chrome("chromium", "~/Library/Application Support/Chromium", "", ""),
        BrowserDef::chrome(
            "brave",
            "~/Library/Application Support/BraveSoftware/Brave-Browser",
            "",
            "",
        ),
        BrowserDef::qute("qutebrowser", "~/.qutebrowser"),
    ]
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub(super) fn defined_browsers() -> Vec<BrowserDef> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browsers::BrowserFamily;

    #[test]
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn table_covers_all_three_families() {
        let defs = defined_browsers();
        for family in [
            BrowserFamily::Mozilla,
            BrowserFamily::Chrome,
            BrowserFamily::Qute,
        ] {
            assert!(
                defs.iter().any(|d| d.family == family),
                "missing {family:?}"
            );
        }
    }
}
