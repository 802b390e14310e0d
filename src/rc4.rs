pub struct RC4Cipher {
    pub s: [u8; 256],
    pub i: usize,
    pub j: usize,
}

impl Default for RC4Cipher {
    fn default() -> Self {
        //Init the permutation to the identity permutation
        let mut s = [0u8; 256];
        for (i, sb) in s.iter_mut().enumerate() {
            *sb = i as u8;
        }

        Self { s, i: 0, j: 0 }
    }
}

impl RC4Cipher {
    pub fn from_key(key: &[u8]) -> RC4Cipher {
        let mut cipher = RC4Cipher::default();

        //Do key scheduling
        let mut j: usize = 0;
        for i in 0..256 {
            j = (j + cipher.s[i] as usize + key[i % key.len()] as usize) % 256;
            cipher.s.swap(i, j);
        }

        cipher
    }

    pub fn gen_keystream_byte(&mut self) -> u8 {
        //Update i, j
        self.i = (self.i + 1) % 256;
        self.j = (self.j + self.s[self.i] as usize) % 256;

        //Swap permutation elements
        self.s.swap(self.i, self.j);

        //Lookup keystream byte
        self.s[(self.s[self.j] as usize + self.s[self.i] as usize) % 256]
    }

    pub fn gen_keystream(&mut self, keystream: &mut [u8]) {
        for ksb in keystream.iter_mut() {
            *ksb = self.gen_keystream_byte();
        }
    }

    pub fn encrypt(&mut self, plain: &[u8]) -> Vec<u8> {
        plain.iter().map(|&b| b ^ self.gen_keystream_byte()).collect()
    }

    pub fn decrypt(&mut self, cipher: &[u8]) -> Vec<u8> {
        //RC4 is a XOR stream cipher, so decryption is just encryption again
        self.encrypt(cipher)
    }

    ///Checks whether `key` reproduces the given keystream prefix.
    pub fn is_key(key: &[u8], keystream: &[u8]) -> bool {
        let mut cipher = RC4Cipher::from_key(key);
        keystream.iter().all(|&ksb| cipher.gen_keystream_byte() == ksb)
    }
}
