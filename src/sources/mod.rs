pub mod doujin;
