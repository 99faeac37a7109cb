pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, error, feed_link, feed_more, header, human_bytes, info, muted, section, stored_file,
    success, warn,
};
pub use progress::Spinner;
pub use table::TableBuilder;
pub use theme::{theme, Theme};
