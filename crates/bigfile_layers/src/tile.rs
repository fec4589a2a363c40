//! Cube face tile addresses (`face_RR_CC`)

use derive_more::derive::Display;
use std::str::FromStr;
use winnow::combinator::{alt, seq};
use winnow::prelude::*;
use winnow::token::take_while;
use winnow::PResult;

use crate::error::{Error, Result};

/// One face of the sky cube
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Face {
    #[display("front")]
    Front,
    #[display("back")]
    Back,
    #[display("left")]
    Left,
    #[display("right")]
    Right,
    #[display("top")]
    Top,
    #[display("bottom")]
    Bottom,
}

/// A tile on one face
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{face}_{row:02}_{column:02}")]
pub struct TileAddress {
    pub face: Face,
    pub row: u8,
    pub column: u8,
}

fn face(input: &mut &str) -> PResult<Face> {
    alt((
        "front".value(Face::Front),
        "back".value(Face::Back),
        "left".value(Face::Left),
        "right".value(Face::Right),
        "top".value(Face::Top),
        "bottom".value(Face::Bottom),
    ))
    .parse_next(input)
}

fn two_digits(input: &mut &str) -> PResult<u8> {
    take_while(2, |c: char| c.is_ascii_digit())
        .try_map(str::parse::<u8>)
        .parse_next(input)
}

fn tile_address(input: &mut &str) -> PResult<TileAddress> {
    seq!(TileAddress {
        face: face,
        _: '_',
        row: two_digits,
        _: '_',
        column: two_digits,
    })
    .parse_next(input)
}

impl FromStr for TileAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        tile_address
            .parse(s)
            .map_err(|_| Error::InvalidCell(s.to_string()))
    }
}

impl TileAddress {
    /// Stem of the image file holding this tile of `layer`
    pub fn stem(&self, layer: &str) -> String {
        format!("{layer}_{self}")
    }
}
