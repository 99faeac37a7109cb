pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const FILE: &str = "📄";
    pub const DEL: &str = "🗑️";
    pub const DATABASE: &str = "🗄️";
    pub const NEWS: &str = "📰";
    pub const AUDIO: &str = "🎧";
    pub const VIDEO: &str = "📺";
    pub const IMAGE: &str = "🖼️";
    pub const ROBOT: &str = "🤖";
    pub const KEY: &str = "🔑";
}
