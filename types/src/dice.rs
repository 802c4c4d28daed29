use crate::constants::{DOUBLE_USES, SEED_LENGTH};
use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::sha256::Digest;

/// Secret per-match seed. Revealed only once the match is over.
pub type Seed = [u8; SEED_LENGTH];

/// One roll of two dice, bound to the match seed commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiceRoll {
    pub die1: u8,
    pub die2: u8,
    /// Monotonic per match, starting at 1.
    pub roll_index: u64,
    /// `sha256(seed)`, published before the first roll.
    pub commitment: Digest,
}

impl DiceRoll {
    pub fn is_double(&self) -> bool {
        self.die1 == self.die2
    }

    /// Die values this roll grants: two, or four copies on a double.
    pub fn uses(&self) -> Vec<u8> {
        if self.is_double() {
            vec![self.die1; DOUBLE_USES]
        } else {
            vec![self.die1, self.die2]
        }
    }
}

impl Write for DiceRoll {
    fn write(&self, writer: &mut impl BufMut) {
        self.die1.write(writer);
        self.die2.write(writer);
        self.roll_index.write(writer);
        self.commitment.write(writer);
    }
}

impl Read for DiceRoll {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let die1 = u8::read(reader)?;
        let die2 = u8::read(reader)?;
        if !(1..=6).contains(&die1) || !(1..=6).contains(&die2) {
            return Err(Error::Invalid("DiceRoll", "die out of range"));
        }
        Ok(Self {
            die1,
            die2,
            roll_index: u64::read(reader)?,
            commitment: Digest::read(reader)?,
        })
    }
}

impl FixedSize for DiceRoll {
    const SIZE: usize = 2 + u64::SIZE + Digest::SIZE;
}
