mod finite;
