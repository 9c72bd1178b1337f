pub mod convnet;
