mod backend;
pub use backend::*;

mod combined;
pub use combined::*;

mod measure;
pub use measure::*;

mod transformed;
pub use transformed::*;
