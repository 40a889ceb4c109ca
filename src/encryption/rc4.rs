// RC4 is small enough that pulling in a crate for it is not worth it.
use super::EncryptionError;

/// Keystream state. Bytes can be pushed through in any number of calls.
#[derive(Clone)]
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.is_empty() || key.len() > 256 {
            return Err(EncryptionError::InvalidKeyLength);
        }

        let mut state = [0_u8; 256];
        for (i, v) in state.iter_mut().enumerate() {
            *v = i as u8;
        }

        let mut j = 0_u8;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Ok(Self { state, i: 0, j: 0 })
    }

    /// XORs the next keystream bytes into `data`.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let index = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
            *byte ^= self.state[index as usize];
        }
    }

    /// One-shot transform; RC4 is its own inverse.
    pub fn process(key: &[u8], input: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut output = input.to_vec();
        Rc4::new(key)?.apply(&mut output);
        Ok(output)
    }
}
