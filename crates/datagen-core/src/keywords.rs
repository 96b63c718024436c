//! Reserved words of the DSL.

pub const SEED: &str = "seed";
pub const COUNT: &str = "count";
pub const NAME: &str = "name";
pub const TAGS: &str = "tags";
pub const PICK: &str = "pick";
pub const ITEM: &str = "item";
pub const VALUE: &str = "value";

pub const GEN: &str = "gen";
pub const OPTIONS: &str = "options";
pub const WEIGHTS: &str = "weights";
pub const CHOICE: &str = "choice";
pub const REF: &str = "ref";
pub const MAP: &str = "map";
pub const FILTER: &str = "filter";
pub const SEQUENTIAL: &str = "sequential";
pub const FIELDS: &str = "fields";

pub const ARRAY: &str = "array";
pub const SIZE: &str = "size";
pub const MIN_SIZE: &str = "minSize";
pub const MAX_SIZE: &str = "maxSize";
pub const DEFAULT_MIN_SIZE: u64 = 0;
pub const DEFAULT_MAX_SIZE: u64 = 10;

pub const SPREAD_PREFIX: &str = "...";
pub const SHADOW_PREFIX: &str = "$";
pub const THIS_PREFIX: &str = "this.";
pub const BY_TAG_OPEN: &str = "byTag[";
pub const WILDCARD: &str = "*";
