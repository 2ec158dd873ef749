/// RC4 keystream state. One instance covers a whole stream, so successive
/// calls to [`Rc4::apply`] continue the same keystream.
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Key scheduling. An empty key yields the identity permutation.
    pub fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (i, slot) in state.iter_mut().enumerate() {
            *slot = i as u8;
        }
        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
                state.swap(i, j as usize);
            }
        }
        Self { state, i: 0, j: 0 }
    }

    /// XORs the keystream into `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let idx = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
            *byte ^= self.state[idx as usize];
        }
    }
}
