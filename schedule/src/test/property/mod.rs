mod search;
mod tiling;
