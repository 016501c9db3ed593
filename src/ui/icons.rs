//! Shared UI icons and emojis.
//!
//! Each icon falls back to plain text on terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Deployment indicators
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ">>");
pub static HOUSE: Emoji<'_, '_> = Emoji("🏠 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "$");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
