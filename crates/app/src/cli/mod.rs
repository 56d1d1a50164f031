pub mod args;
pub mod op;
pub mod ops;

pub use ops::{
    Account, Cp, Find, Get, Info, Init, Link, Ls, Mkdir, Mv, Put, Rename, Rm, Share, Trash,
    Tree, Version,
};
