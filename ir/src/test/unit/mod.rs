mod tensor;
